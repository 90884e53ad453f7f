pub mod postgres_analysis_job_repository;
pub mod postgres_session_repository;
pub mod postgres_usage_repository;

pub use postgres_analysis_job_repository::PostgresAnalysisJobRepository;
pub use postgres_session_repository::PostgresSessionRepository;
pub use postgres_usage_repository::PostgresUsageRepository;
