pub mod cancel_analysis_job;
pub mod create_analysis_job;
pub mod delete_analysis_job;
pub mod get_analysis_job;
pub mod resume_analysis_jobs;

pub use cancel_analysis_job::{CancelAnalysisJobError, CancelAnalysisJobUseCase};
pub use create_analysis_job::{
    CreateAnalysisJobError, CreateAnalysisJobRequest, CreateAnalysisJobUseCase,
};
pub use delete_analysis_job::{DeleteAnalysisJobError, DeleteAnalysisJobUseCase};
pub use get_analysis_job::{AnalysisJobDetails, GetAnalysisJobError, GetAnalysisJobUseCase};
pub use resume_analysis_jobs::ResumeAnalysisJobsUseCase;
