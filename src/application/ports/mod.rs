pub mod inference_provider;
pub mod job_queue;
pub mod progress_publisher;
pub mod token_counter;

pub use inference_provider::InferenceProvider;
pub use job_queue::JobQueue;
pub use progress_publisher::{AnalysisEvent, AnalysisEventKind, ProgressPublisher};
pub use token_counter::TokenCounter;
