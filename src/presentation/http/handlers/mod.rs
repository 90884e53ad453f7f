pub mod analysis_handler;
pub mod sse_handler;

pub use analysis_handler::AnalysisHandler;
pub use sse_handler::SseHandler;
