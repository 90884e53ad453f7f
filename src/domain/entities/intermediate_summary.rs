use serde::{Deserialize, Serialize};

use crate::domain::value_objects::SummaryStatus;

/// Result of the map step for one (job, session) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateSummary {
    pub id: i32,
    pub analysis_job_id: i32,
    pub session_id: i32,
    pub summary_text: Option<String>,
    pub status: SummaryStatus,
    pub error_message: Option<String>,
}

impl IntermediateSummary {
    pub fn pending(id: i32, analysis_job_id: i32, session_id: i32) -> Self {
        Self {
            id,
            analysis_job_id,
            session_id,
            summary_text: None,
            status: SummaryStatus::Pending,
            error_message: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SummaryStatus::Completed
    }
}
