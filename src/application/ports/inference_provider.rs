use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Malformed stream event: {0}")]
    StreamError(String),
    #[error("Service unavailable after {0} attempts")]
    ServiceUnavailable(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Per-call settings. Dropping or cancelling `cancel` must end the stream and
/// release the underlying request.
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub model: String,
    /// Context window the backend should allocate for the call.
    pub context_size: Option<i32>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceChunk {
    Delta(String),
    Usage {
        prompt_tokens: Option<i32>,
        completion_tokens: Option<i32>,
    },
}

pub type InferenceStream = BoxStream<'static, Result<InferenceChunk, InferenceError>>;

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: InferenceOptions,
    ) -> Result<InferenceStream, InferenceError>;
}
