use async_trait::async_trait;

use crate::domain::entities::{AnalysisJob, IntermediateSummary, NewAnalysisJob, StatusChange};
use crate::domain::value_objects::{AnalysisStatus, AnalysisStrategy};

#[derive(Debug, thiserror::Error)]
pub enum JobRepositoryError {
    #[error("Analysis job not found: {0}")]
    NotFound(i32),
    #[error("Intermediate summary not found: {0}")]
    SummaryNotFound(i32),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Durable store for analysis jobs and their intermediate summaries. It is the
/// only channel between the cancel path and a running worker.
#[async_trait]
pub trait AnalysisJobRepository: Send + Sync {
    /// Insert the job, its session links and one pending summary per session.
    async fn create(&self, job: &NewAnalysisJob) -> Result<AnalysisJob, JobRepositoryError>;

    async fn find_by_id(&self, job_id: i32) -> Result<Option<AnalysisJob>, JobRepositoryError>;

    /// All jobs, newest first.
    async fn list(&self) -> Result<Vec<AnalysisJob>, JobRepositoryError>;

    async fn find_status(&self, job_id: i32) -> Result<Option<AnalysisStatus>, JobRepositoryError>;

    /// Jobs a restarted process must pick back up.
    async fn find_unfinished(&self) -> Result<Vec<AnalysisJob>, JobRepositoryError>;

    /// Atomically apply `change` if the stored status allows it. Returns
    /// `Ok(false)` when the transition is not legal from the current status.
    async fn transition(
        &self,
        job_id: i32,
        change: StatusChange,
    ) -> Result<bool, JobRepositoryError>;

    async fn save_strategy(
        &self,
        job_id: i32,
        strategy: &AnalysisStrategy,
    ) -> Result<(), JobRepositoryError>;

    async fn set_short_prompt(&self, job_id: i32, short_prompt: &str)
    -> Result<(), JobRepositoryError>;

    /// Delete the job together with its summaries.
    async fn delete(&self, job_id: i32) -> Result<bool, JobRepositoryError>;

    async fn summaries_for_job(
        &self,
        job_id: i32,
    ) -> Result<Vec<IntermediateSummary>, JobRepositoryError>;

    async fn pending_summaries(
        &self,
        job_id: i32,
    ) -> Result<Vec<IntermediateSummary>, JobRepositoryError>;

    /// Put summaries stuck in `processing` (left by a crashed worker) back to
    /// `pending`. Returns how many were reset.
    async fn reset_processing_summaries(&self, job_id: i32) -> Result<usize, JobRepositoryError>;

    async fn mark_summary_processing(&self, summary_id: i32) -> Result<(), JobRepositoryError>;

    async fn complete_summary(
        &self,
        summary_id: i32,
        summary_text: &str,
    ) -> Result<(), JobRepositoryError>;

    async fn fail_summary(
        &self,
        summary_id: i32,
        error_message: &str,
    ) -> Result<(), JobRepositoryError>;
}
