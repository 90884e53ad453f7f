use std::sync::Arc;
use tracing::info;

use crate::application::ports::{AnalysisEvent, ProgressPublisher};
use crate::domain::entities::StatusChange;
use crate::domain::repositories::{AnalysisJobRepository, JobRepositoryError};
use crate::domain::value_objects::AnalysisStatus;

#[derive(Debug)]
pub enum CancelAnalysisJobError {
    JobNotFound(i32),
    RepositoryError(String),
    JobNotCancellable(String),
}

impl std::fmt::Display for CancelAnalysisJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelAnalysisJobError::JobNotFound(id) => write!(f, "Analysis job not found: {}", id),
            CancelAnalysisJobError::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            CancelAnalysisJobError::JobNotCancellable(msg) => {
                write!(f, "Job not cancellable: {}", msg)
            }
        }
    }
}

impl std::error::Error for CancelAnalysisJobError {}

impl From<JobRepositoryError> for CancelAnalysisJobError {
    fn from(error: JobRepositoryError) -> Self {
        match error {
            JobRepositoryError::NotFound(id) => CancelAnalysisJobError::JobNotFound(id),
            _ => CancelAnalysisJobError::RepositoryError(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelAnalysisJobResponse {
    pub job_id: i32,
    pub status: AnalysisStatus,
    pub message: String,
}

/// Requests cancellation by writing `canceling` to the job row. The worker
/// owning the job observes it and finalizes `canceled`.
pub struct CancelAnalysisJobUseCase {
    job_repository: Arc<dyn AnalysisJobRepository>,
    publisher: Arc<dyn ProgressPublisher>,
}

impl CancelAnalysisJobUseCase {
    pub fn new(
        job_repository: Arc<dyn AnalysisJobRepository>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            job_repository,
            publisher,
        }
    }

    pub async fn execute(
        &self,
        job_id: i32,
    ) -> Result<CancelAnalysisJobResponse, CancelAnalysisJobError> {
        let status = self
            .job_repository
            .find_status(job_id)
            .await?
            .ok_or(CancelAnalysisJobError::JobNotFound(job_id))?;

        if status.is_canceling() {
            return Ok(CancelAnalysisJobResponse {
                job_id,
                status,
                message: "Cancellation already requested".to_string(),
            });
        }

        let applied = self
            .job_repository
            .transition(job_id, StatusChange::to(AnalysisStatus::Canceling))
            .await?;

        if !applied {
            // The job reached a terminal state between the read and the write.
            let current = self
                .job_repository
                .find_status(job_id)
                .await?
                .ok_or(CancelAnalysisJobError::JobNotFound(job_id))?;
            if current.is_canceling() {
                return Ok(CancelAnalysisJobResponse {
                    job_id,
                    status: current,
                    message: "Cancellation already requested".to_string(),
                });
            }
            return Err(CancelAnalysisJobError::JobNotCancellable(format!(
                "Job is {} and cannot be canceled",
                current
            )));
        }

        info!("Cancellation requested for analysis job {}", job_id);
        self.publisher.publish(AnalysisEvent::status(
            job_id,
            AnalysisStatus::Canceling,
            None,
        ));

        Ok(CancelAnalysisJobResponse {
            job_id,
            status: AnalysisStatus::Canceling,
            message: "Cancellation requested".to_string(),
        })
    }
}
