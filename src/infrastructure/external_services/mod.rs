pub mod inference_client;
pub mod token_estimator;

pub use inference_client::{InferenceClient, InferenceClientConfig};
pub use token_estimator::TiktokenCounter;
