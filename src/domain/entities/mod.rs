pub mod analysis_job;
pub mod intermediate_summary;
pub mod session;
pub mod usage_record;

pub use analysis_job::{AnalysisJob, NewAnalysisJob, StatusChange};
pub use intermediate_summary::IntermediateSummary;
pub use session::SessionInfo;
pub use usage_record::{UsageRecord, UsageSource};
