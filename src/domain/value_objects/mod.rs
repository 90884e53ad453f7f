pub mod analysis_status;
pub mod analysis_strategy;
pub mod summary_status;

pub use analysis_status::AnalysisStatus;
pub use analysis_strategy::AnalysisStrategy;
pub use summary_status::SummaryStatus;
