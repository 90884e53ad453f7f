use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::entities::IntermediateSummary;
use crate::domain::value_objects::SummaryStatus;
use crate::infrastructure::database::schema::intermediate_summaries;

#[derive(Debug, Queryable, Identifiable, Selectable)]
#[diesel(table_name = intermediate_summaries)]
#[diesel(primary_key(id))]
pub struct SummaryModel {
    pub id: i32,
    pub analysis_job_id: i32,
    pub session_id: i32,
    pub summary_text: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = intermediate_summaries)]
pub struct NewSummaryModel {
    pub analysis_job_id: i32,
    pub session_id: i32,
    pub status: String,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = intermediate_summaries)]
pub struct UpdateSummaryModel {
    pub status: String,
    pub summary_text: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
    pub updated_at: DateTime<Utc>,
}

impl NewSummaryModel {
    pub fn pending(analysis_job_id: i32, session_id: i32) -> Self {
        Self {
            analysis_job_id,
            session_id,
            status: SummaryStatus::Pending.as_str().to_string(),
        }
    }
}

impl UpdateSummaryModel {
    pub fn status(status: SummaryStatus) -> Self {
        Self {
            status: status.as_str().to_string(),
            summary_text: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn completed(summary_text: &str) -> Self {
        Self {
            summary_text: Some(Some(summary_text.to_string())),
            error_message: Some(None),
            ..Self::status(SummaryStatus::Completed)
        }
    }

    pub fn failed(error_message: &str) -> Self {
        Self {
            error_message: Some(Some(error_message.to_string())),
            ..Self::status(SummaryStatus::Failed)
        }
    }
}

impl TryFrom<SummaryModel> for IntermediateSummary {
    type Error = String;

    fn try_from(model: SummaryModel) -> Result<Self, Self::Error> {
        Ok(IntermediateSummary {
            id: model.id,
            analysis_job_id: model.analysis_job_id,
            session_id: model.session_id,
            summary_text: model.summary_text,
            status: SummaryStatus::from_string(&model.status)?,
            error_message: model.error_message,
        })
    }
}
