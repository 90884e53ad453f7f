use std::sync::Arc;
use tracing::info;

use crate::application::ports::ProgressPublisher;
use crate::domain::repositories::{AnalysisJobRepository, JobRepositoryError};

#[derive(Debug)]
pub enum DeleteAnalysisJobError {
    JobNotFound(i32),
    RepositoryError(String),
}

impl std::fmt::Display for DeleteAnalysisJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteAnalysisJobError::JobNotFound(id) => write!(f, "Analysis job not found: {}", id),
            DeleteAnalysisJobError::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
        }
    }
}

impl std::error::Error for DeleteAnalysisJobError {}

impl From<JobRepositoryError> for DeleteAnalysisJobError {
    fn from(error: JobRepositoryError) -> Self {
        match error {
            JobRepositoryError::NotFound(id) => DeleteAnalysisJobError::JobNotFound(id),
            _ => DeleteAnalysisJobError::RepositoryError(error.to_string()),
        }
    }
}

/// Deletes a job with its summaries. A worker still running the job notices
/// the missing row at its next status poll and stops.
pub struct DeleteAnalysisJobUseCase {
    job_repository: Arc<dyn AnalysisJobRepository>,
    publisher: Arc<dyn ProgressPublisher>,
}

impl DeleteAnalysisJobUseCase {
    pub fn new(
        job_repository: Arc<dyn AnalysisJobRepository>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            job_repository,
            publisher,
        }
    }

    pub async fn execute(&self, job_id: i32) -> Result<(), DeleteAnalysisJobError> {
        if !self.job_repository.delete(job_id).await? {
            return Err(DeleteAnalysisJobError::JobNotFound(job_id));
        }

        self.publisher.close(job_id);
        info!("Deleted analysis job {}", job_id);
        Ok(())
    }
}
