pub mod analysis_job_repository;
pub mod session_repository;
pub mod usage_repository;

pub use analysis_job_repository::{AnalysisJobRepository, JobRepositoryError};
pub use session_repository::{SessionRepository, SessionRepositoryError, TranscriptRepository};
pub use usage_repository::{UsageRepository, UsageRepositoryError};
