use chrono::NaiveDate;
use std::sync::Arc;
use tracing::warn;

use crate::domain::entities::{AnalysisJob, IntermediateSummary};
use crate::domain::repositories::{AnalysisJobRepository, JobRepositoryError, SessionRepository};

#[derive(Debug)]
pub enum GetAnalysisJobError {
    JobNotFound(i32),
    RepositoryError(String),
}

impl std::fmt::Display for GetAnalysisJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GetAnalysisJobError::JobNotFound(id) => write!(f, "Analysis job not found: {}", id),
            GetAnalysisJobError::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
        }
    }
}

impl std::error::Error for GetAnalysisJobError {}

impl From<JobRepositoryError> for GetAnalysisJobError {
    fn from(error: JobRepositoryError) -> Self {
        match error {
            JobRepositoryError::NotFound(id) => GetAnalysisJobError::JobNotFound(id),
            _ => GetAnalysisJobError::RepositoryError(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryDetails {
    pub summary: IntermediateSummary,
    pub session_name: Option<String>,
    pub session_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct AnalysisJobDetails {
    pub job: AnalysisJob,
    pub summaries: Vec<SummaryDetails>,
}

pub struct GetAnalysisJobUseCase {
    job_repository: Arc<dyn AnalysisJobRepository>,
    session_repository: Arc<dyn SessionRepository>,
}

impl GetAnalysisJobUseCase {
    pub fn new(
        job_repository: Arc<dyn AnalysisJobRepository>,
        session_repository: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            job_repository,
            session_repository,
        }
    }

    pub async fn execute(&self, job_id: i32) -> Result<AnalysisJobDetails, GetAnalysisJobError> {
        let job = self
            .job_repository
            .find_by_id(job_id)
            .await?
            .ok_or(GetAnalysisJobError::JobNotFound(job_id))?;

        let mut summaries = Vec::new();
        for summary in self.job_repository.summaries_for_job(job_id).await? {
            // Session metadata is decoration; a lookup failure keeps the summary.
            let session = match self.session_repository.find_by_id(summary.session_id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!("Failed to load session {}: {}", summary.session_id, e);
                    None
                }
            };
            summaries.push(SummaryDetails {
                session_name: session.as_ref().map(|s| s.display_name().to_string()),
                session_date: session.map(|s| s.date),
                summary,
            });
        }

        Ok(AnalysisJobDetails { job, summaries })
    }

    pub async fn list(&self) -> Result<Vec<AnalysisJob>, GetAnalysisJobError> {
        self.job_repository
            .list()
            .await
            .map_err(GetAnalysisJobError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::NewAnalysisJob;
    use crate::testing::{InMemoryAnalysisJobRepository, InMemorySessionStore, session};

    #[tokio::test]
    async fn test_details_include_session_metadata() {
        let jobs = Arc::new(InMemoryAnalysisJobRepository::default());
        let sessions = InMemorySessionStore::default();
        sessions.insert(session(5, "2025-02-14", Some(10)), "text");
        let job = jobs
            .create(&NewAnalysisJob {
                original_prompt: "q".to_string(),
                session_ids: vec![5, 6],
                model_name: None,
                context_size: None,
                use_advanced_strategy: false,
            })
            .await
            .unwrap();
        let use_case = GetAnalysisJobUseCase::new(jobs, Arc::new(sessions));

        let details = use_case.execute(job.id()).await.unwrap();

        assert_eq!(details.summaries.len(), 2);
        assert_eq!(details.summaries[0].session_name.as_deref(), Some("Session 5"));
        assert_eq!(
            details.summaries[0].session_date,
            NaiveDate::from_ymd_opt(2025, 2, 14)
        );
        assert!(details.summaries[1].session_name.is_none());
    }

    #[tokio::test]
    async fn test_missing_job() {
        let use_case = GetAnalysisJobUseCase::new(
            Arc::new(InMemoryAnalysisJobRepository::default()),
            Arc::new(InMemorySessionStore::default()),
        );

        assert!(matches!(
            use_case.execute(9).await,
            Err(GetAnalysisJobError::JobNotFound(9))
        ));
    }
}
