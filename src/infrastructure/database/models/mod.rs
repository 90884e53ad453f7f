pub mod analysis_job_model;
pub mod session_model;
pub mod summary_model;
pub mod usage_log_model;

pub use analysis_job_model::*;
pub use session_model::*;
pub use summary_model::*;
pub use usage_log_model::*;
