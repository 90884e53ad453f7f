use std::sync::Arc;

use crate::{
    application::{
        ports::{InferenceProvider, JobQueue, ProgressPublisher, TokenCounter},
        services::{
            AnalysisOrchestrator, ContextBudgetCalculator, ShortPromptGenerator, StrategyPlanner,
            UsageLedger,
        },
        use_cases::{
            CancelAnalysisJobUseCase, CreateAnalysisJobUseCase, DeleteAnalysisJobUseCase,
            GetAnalysisJobUseCase, ResumeAnalysisJobsUseCase,
        },
    },
    domain::repositories::{
        AnalysisJobRepository, SessionRepository, TranscriptRepository, UsageRepository,
    },
    infrastructure::{
        config::AppConfig,
        database::{
            DbPool,
            repositories::{
                PostgresAnalysisJobRepository, PostgresSessionRepository, PostgresUsageRepository,
            },
        },
        external_services::{InferenceClient, TiktokenCounter},
        messaging::{BackgroundProcessor, MpscJobQueue, ProgressBroadcaster},
    },
    presentation::http::handlers::{AnalysisHandler, SseHandler},
};

pub struct AppContainer {
    // Repositories
    pub job_repository: Arc<dyn AnalysisJobRepository>,
    pub session_repository: Arc<PostgresSessionRepository>,
    pub usage_repository: Arc<dyn UsageRepository>,

    // External Services
    pub inference: Arc<dyn InferenceProvider>,
    pub token_counter: Arc<dyn TokenCounter>,

    // Job Queue, Progress and Background Processing
    pub job_queue: Arc<dyn JobQueue>,
    pub progress_broadcaster: Arc<ProgressBroadcaster>,
    pub background_processor: Arc<BackgroundProcessor>,

    // Application Services
    pub usage_ledger: Arc<UsageLedger>,
    pub orchestrator: Arc<AnalysisOrchestrator>,

    // Use Cases
    pub create_job_use_case: Arc<CreateAnalysisJobUseCase>,
    pub get_job_use_case: Arc<GetAnalysisJobUseCase>,
    pub cancel_job_use_case: Arc<CancelAnalysisJobUseCase>,
    pub delete_job_use_case: Arc<DeleteAnalysisJobUseCase>,
    pub resume_jobs_use_case: Arc<ResumeAnalysisJobsUseCase>,

    // HTTP Handlers
    pub analysis_handler: Arc<AnalysisHandler>,
    pub sse_handler: Arc<SseHandler>,
}

impl AppContainer {
    /// Wires every component. Expects migrations to have run on `db_pool`.
    pub fn new(config: &AppConfig, db_pool: DbPool) -> Result<Self, Box<dyn std::error::Error>> {
        // Create repositories
        let job_repository: Arc<dyn AnalysisJobRepository> =
            Arc::new(PostgresAnalysisJobRepository::new(db_pool.clone()));
        let session_repository = Arc::new(PostgresSessionRepository::new(db_pool.clone()));
        let usage_repository: Arc<dyn UsageRepository> =
            Arc::new(PostgresUsageRepository::new(db_pool));
        let sessions: Arc<dyn SessionRepository> = session_repository.clone();
        let transcripts: Arc<dyn TranscriptRepository> = session_repository.clone();

        // Create external services
        let inference: Arc<dyn InferenceProvider> = Arc::new(
            InferenceClient::new(config.inference.clone())
                .map_err(|e| format!("Failed to create inference client: {}", e))?,
        );
        let token_counter: Arc<dyn TokenCounter> = Arc::new(TiktokenCounter::new());

        // Create job queue and progress fan-out
        let (job_queue, job_receiver) = MpscJobQueue::create_pair();
        let job_queue: Arc<dyn JobQueue> = Arc::new(job_queue);
        let progress_broadcaster = Arc::new(ProgressBroadcaster::new(
            config.analysis.progress_channel_capacity,
        ));
        let publisher: Arc<dyn ProgressPublisher> = progress_broadcaster.clone();

        // Create application services
        let usage_ledger = Arc::new(UsageLedger::new(usage_repository.clone()));
        let strategy_planner = Arc::new(StrategyPlanner::new(
            inference.clone(),
            usage_ledger.clone(),
        ));
        let short_prompt_generator = Arc::new(ShortPromptGenerator::new(
            job_repository.clone(),
            inference.clone(),
            usage_ledger.clone(),
        ));
        let budget_calculator = Arc::new(ContextBudgetCalculator::new(
            sessions.clone(),
            transcripts.clone(),
            token_counter.clone(),
            config.analysis.answer_token_reserve,
        ));
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            job_repository.clone(),
            sessions.clone(),
            transcripts,
            inference.clone(),
            strategy_planner,
            publisher.clone(),
            usage_ledger.clone(),
        ));

        let background_processor = Arc::new(
            BackgroundProcessor::new(
                Arc::new(job_receiver),
                job_repository.clone(),
                orchestrator.clone(),
                config.worker_settings(),
            )
            .with_worker_count(config.analysis.worker_count),
        );

        // Create use cases
        let create_job_use_case = Arc::new(CreateAnalysisJobUseCase::new(
            job_repository.clone(),
            job_queue.clone(),
            budget_calculator,
            short_prompt_generator,
            config.model_catalog(),
        ));
        let get_job_use_case = Arc::new(GetAnalysisJobUseCase::new(
            job_repository.clone(),
            sessions,
        ));
        let cancel_job_use_case = Arc::new(CancelAnalysisJobUseCase::new(
            job_repository.clone(),
            publisher.clone(),
        ));
        let delete_job_use_case = Arc::new(DeleteAnalysisJobUseCase::new(
            job_repository.clone(),
            publisher,
        ));
        let resume_jobs_use_case = Arc::new(ResumeAnalysisJobsUseCase::new(
            job_repository.clone(),
            job_queue.clone(),
        ));

        // Create HTTP handlers
        let analysis_handler = Arc::new(AnalysisHandler::new(
            create_job_use_case.clone(),
            get_job_use_case.clone(),
            cancel_job_use_case.clone(),
            delete_job_use_case.clone(),
            job_queue.clone(),
        ));
        let sse_handler = Arc::new(SseHandler::new(
            get_job_use_case.clone(),
            progress_broadcaster.clone(),
        ));

        Ok(Self {
            job_repository,
            session_repository,
            usage_repository,
            inference,
            token_counter,
            job_queue,
            progress_broadcaster,
            background_processor,
            usage_ledger,
            orchestrator,
            create_job_use_case,
            get_job_use_case,
            cancel_job_use_case,
            delete_job_use_case,
            resume_jobs_use_case,
            analysis_handler,
            sse_handler,
        })
    }
}
