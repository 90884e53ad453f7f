use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::entities::{AnalysisJob, NewAnalysisJob, StatusChange};
use crate::domain::value_objects::{AnalysisStatus, AnalysisStrategy};
use crate::infrastructure::database::schema::{analysis_job_sessions, analysis_jobs};

#[derive(Debug, Queryable, Identifiable, Selectable)]
#[diesel(table_name = analysis_jobs)]
#[diesel(primary_key(id))]
pub struct AnalysisJobModel {
    pub id: i32,
    pub original_prompt: String,
    pub short_prompt: Option<String>,
    pub model_name: Option<String>,
    pub context_size: Option<i32>,
    pub use_advanced_strategy: bool,
    pub strategy_json: Option<serde_json::Value>,
    pub status: String,
    pub final_result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = analysis_jobs)]
pub struct NewAnalysisJobModel {
    pub original_prompt: String,
    pub model_name: Option<String>,
    pub context_size: Option<i32>,
    pub use_advanced_strategy: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Columns written by a status transition. `None` clears the column.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = analysis_jobs)]
#[diesel(treat_none_as_null = true)]
pub struct StatusChangeModel {
    pub status: String,
    pub final_result: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = analysis_job_sessions)]
pub struct JobSessionModel {
    pub analysis_job_id: i32,
    pub session_id: i32,
    pub position: i32,
}

impl From<&NewAnalysisJob> for NewAnalysisJobModel {
    fn from(job: &NewAnalysisJob) -> Self {
        Self {
            original_prompt: job.original_prompt.clone(),
            model_name: job.model_name.clone(),
            context_size: job.context_size,
            use_advanced_strategy: job.use_advanced_strategy,
            status: AnalysisStatus::Pending.as_str().to_string(),
            created_at: Utc::now(),
        }
    }
}

impl From<&StatusChange> for StatusChangeModel {
    fn from(change: &StatusChange) -> Self {
        Self {
            status: change.status.as_str().to_string(),
            final_result: change.final_result.clone(),
            error_message: change.error_message.clone(),
            completed_at: change.status.is_terminal().then(Utc::now),
        }
    }
}

impl AnalysisJobModel {
    /// Rebuild the domain job. Session ids live in the join table and are
    /// passed in by the repository, already ordered by position.
    pub fn into_domain(self, session_ids: Vec<i32>) -> Result<AnalysisJob, String> {
        let status = AnalysisStatus::from_string(&self.status)?;
        let strategy = self
            .strategy_json
            .map(AnalysisStrategy::from_json)
            .transpose()?;

        Ok(AnalysisJob::from_database(
            self.id,
            self.original_prompt,
            self.short_prompt,
            session_ids,
            self.model_name,
            self.context_size,
            self.use_advanced_strategy,
            strategy,
            status,
            self.final_result,
            self.error_message,
            self.created_at,
            self.completed_at,
        ))
    }
}
