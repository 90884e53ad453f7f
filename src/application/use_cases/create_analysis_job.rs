use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::ports::{JobQueue, job_queue::JobQueueError};
use crate::application::services::context_budget::{
    BudgetError, ContextBudget, ContextBudgetCalculator, ModelCatalog,
};
use crate::application::services::ShortPromptGenerator;
use crate::domain::entities::{AnalysisJob, NewAnalysisJob, StatusChange};
use crate::domain::repositories::{AnalysisJobRepository, JobRepositoryError};

#[derive(Debug)]
pub enum CreateAnalysisJobError {
    ValidationError(String),
    SessionNotFound(i32),
    BudgetExceeded(String),
    RepositoryError(String),
    QueueError(String),
}

impl std::fmt::Display for CreateAnalysisJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateAnalysisJobError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            CreateAnalysisJobError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            CreateAnalysisJobError::BudgetExceeded(msg) => write!(f, "{}", msg),
            CreateAnalysisJobError::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            CreateAnalysisJobError::QueueError(msg) => write!(f, "Queue error: {}", msg),
        }
    }
}

impl std::error::Error for CreateAnalysisJobError {}

impl From<JobRepositoryError> for CreateAnalysisJobError {
    fn from(error: JobRepositoryError) -> Self {
        match error {
            JobRepositoryError::ValidationError(msg) => CreateAnalysisJobError::ValidationError(msg),
            _ => CreateAnalysisJobError::RepositoryError(error.to_string()),
        }
    }
}

impl From<JobQueueError> for CreateAnalysisJobError {
    fn from(error: JobQueueError) -> Self {
        CreateAnalysisJobError::QueueError(error.to_string())
    }
}

impl From<BudgetError> for CreateAnalysisJobError {
    fn from(error: BudgetError) -> Self {
        match error {
            BudgetError::Exceeded { .. } => CreateAnalysisJobError::BudgetExceeded(error.to_string()),
            BudgetError::SessionNotFound(id) => CreateAnalysisJobError::SessionNotFound(id),
            BudgetError::RepositoryError(msg) => CreateAnalysisJobError::RepositoryError(msg),
            BudgetError::Template(e) => CreateAnalysisJobError::RepositoryError(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateAnalysisJobRequest {
    pub prompt: String,
    pub session_ids: Vec<i32>,
    pub model_name: Option<String>,
    pub use_advanced_strategy: bool,
}

#[derive(Debug, Clone)]
pub struct CreateAnalysisJobResponse {
    pub job: AnalysisJob,
    pub budget: ContextBudget,
}

pub struct CreateAnalysisJobUseCase {
    job_repository: Arc<dyn AnalysisJobRepository>,
    job_queue: Arc<dyn JobQueue>,
    budget_calculator: Arc<ContextBudgetCalculator>,
    short_prompt_generator: Arc<ShortPromptGenerator>,
    model_catalog: ModelCatalog,
}

impl CreateAnalysisJobUseCase {
    pub fn new(
        job_repository: Arc<dyn AnalysisJobRepository>,
        job_queue: Arc<dyn JobQueue>,
        budget_calculator: Arc<ContextBudgetCalculator>,
        short_prompt_generator: Arc<ShortPromptGenerator>,
        model_catalog: ModelCatalog,
    ) -> Self {
        Self {
            job_repository,
            job_queue,
            budget_calculator,
            short_prompt_generator,
            model_catalog,
        }
    }

    pub async fn execute(
        &self,
        request: CreateAnalysisJobRequest,
    ) -> Result<CreateAnalysisJobResponse, CreateAnalysisJobError> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(CreateAnalysisJobError::ValidationError(
                "Prompt cannot be empty".to_string(),
            ));
        }

        let session_ids = dedupe_session_ids(&request.session_ids)?;
        let model = self.model_catalog.resolve_model(request.model_name.as_deref());
        let model_limit = self.model_catalog.context_limit(&model);

        // Rejections happen before any row is written. The job keeps the
        // whole model window; the budget only proves the largest map call fits.
        let budget = self
            .budget_calculator
            .check(&prompt, &model, model_limit, &session_ids)
            .await?;

        let job = self
            .job_repository
            .create(&NewAnalysisJob {
                original_prompt: prompt.clone(),
                session_ids,
                model_name: request
                    .model_name
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty()),
                context_size: Some(model_limit.min(i32::MAX as usize) as i32),
                use_advanced_strategy: request.use_advanced_strategy,
            })
            .await?;

        if let Err(e) = self.job_queue.enqueue(job.id()).await {
            error!("Failed to enqueue analysis job {}: {}", job.id(), e);
            match self
                .job_repository
                .transition(job.id(), StatusChange::failed(format!("Could not queue job: {}", e)))
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!("Analysis job {} changed state before it was queued", job.id()),
                Err(mark_err) => error!(
                    "Could not mark unqueued analysis job {} as failed: {}",
                    job.id(),
                    mark_err
                ),
            }
            return Err(e.into());
        }

        info!(
            "Created analysis job {} over {} sessions ({} of {} tokens)",
            job.id(),
            job.session_ids().len(),
            budget.total(),
            model_limit
        );

        let generator = self.short_prompt_generator.clone();
        let job_id = job.id();
        tokio::spawn(async move {
            generator.label(job_id, &prompt, &model).await;
        });

        Ok(CreateAnalysisJobResponse { job, budget })
    }
}

/// Keep the first occurrence of every id, in request order.
fn dedupe_session_ids(session_ids: &[i32]) -> Result<Vec<i32>, CreateAnalysisJobError> {
    if session_ids.is_empty() {
        return Err(CreateAnalysisJobError::ValidationError(
            "At least one session is required".to_string(),
        ));
    }

    let mut unique = Vec::with_capacity(session_ids.len());
    for &id in session_ids {
        if id <= 0 {
            return Err(CreateAnalysisJobError::ValidationError(format!(
                "Invalid session id: {}",
                id
            )));
        }
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    Ok(unique)
}
