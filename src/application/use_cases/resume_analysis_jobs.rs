use std::sync::Arc;
use tracing::{info, warn};

use crate::application::ports::{JobQueue, job_queue::JobQueueError};
use crate::domain::repositories::{AnalysisJobRepository, JobRepositoryError};

#[derive(Debug)]
pub enum ResumeAnalysisJobsError {
    RepositoryError(String),
    QueueError(String),
}

impl std::fmt::Display for ResumeAnalysisJobsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeAnalysisJobsError::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            ResumeAnalysisJobsError::QueueError(msg) => write!(f, "Queue error: {}", msg),
        }
    }
}

impl std::error::Error for ResumeAnalysisJobsError {}

impl From<JobRepositoryError> for ResumeAnalysisJobsError {
    fn from(error: JobRepositoryError) -> Self {
        ResumeAnalysisJobsError::RepositoryError(error.to_string())
    }
}

impl From<JobQueueError> for ResumeAnalysisJobsError {
    fn from(error: JobQueueError) -> Self {
        ResumeAnalysisJobsError::QueueError(error.to_string())
    }
}

/// Startup recovery: every job a previous process left unfinished goes back
/// on the queue and resumes from its stored status.
pub struct ResumeAnalysisJobsUseCase {
    job_repository: Arc<dyn AnalysisJobRepository>,
    job_queue: Arc<dyn JobQueue>,
}

impl ResumeAnalysisJobsUseCase {
    pub fn new(job_repository: Arc<dyn AnalysisJobRepository>, job_queue: Arc<dyn JobQueue>) -> Self {
        Self {
            job_repository,
            job_queue,
        }
    }

    pub async fn execute(&self) -> Result<usize, ResumeAnalysisJobsError> {
        let unfinished = self.job_repository.find_unfinished().await?;

        let mut resumed = 0;
        for job in unfinished {
            if !job.status().is_resumable() {
                warn!("Skipping job {} in status {}", job.id(), job.status());
                continue;
            }
            self.job_queue.enqueue(job.id()).await?;
            resumed += 1;
        }

        if resumed > 0 {
            info!("Resumed {} unfinished analysis jobs", resumed);
        }
        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{NewAnalysisJob, StatusChange};
    use crate::domain::value_objects::AnalysisStatus;
    use crate::testing::{InMemoryAnalysisJobRepository, InMemoryJobQueue};

    fn new_job() -> NewAnalysisJob {
        NewAnalysisJob {
            original_prompt: "q".to_string(),
            session_ids: vec![1],
            model_name: None,
            context_size: None,
            use_advanced_strategy: false,
        }
    }

    #[tokio::test]
    async fn test_requeues_only_unfinished_jobs() {
        let jobs = Arc::new(InMemoryAnalysisJobRepository::default());
        let queue = Arc::new(InMemoryJobQueue::default());

        let pending = jobs.create(&new_job()).await.unwrap();
        let mapping = jobs.create(&new_job()).await.unwrap();
        jobs.transition(mapping.id(), StatusChange::to(AnalysisStatus::Mapping))
            .await
            .unwrap();
        let done = jobs.create(&new_job()).await.unwrap();
        jobs.force_status(done.id(), AnalysisStatus::Completed);
        let canceling = jobs.create(&new_job()).await.unwrap();
        jobs.request_cancel(canceling.id());

        let resumed = ResumeAnalysisJobsUseCase::new(jobs, queue.clone())
            .execute()
            .await
            .unwrap();

        assert_eq!(resumed, 3);
        let mut enqueued = queue.enqueued();
        enqueued.sort();
        assert_eq!(enqueued, vec![pending.id(), mapping.id(), canceling.id()]);
    }
}
