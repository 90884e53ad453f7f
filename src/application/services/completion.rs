use futures::StreamExt;

use crate::application::ports::InferenceProvider;
use crate::application::ports::inference_provider::{
    ChatMessage, InferenceChunk, InferenceError, InferenceOptions,
};
use crate::application::services::usage_ledger::TokenUsage;

/// Run a streaming call to the end and return the whole text. Used for the
/// short calls whose tokens are not broadcast.
pub async fn collect_completion(
    inference: &dyn InferenceProvider,
    messages: Vec<ChatMessage>,
    options: InferenceOptions,
) -> Result<(String, TokenUsage), InferenceError> {
    let mut stream = inference.stream(messages, options).await?;
    let mut text = String::new();
    let mut usage = TokenUsage::default();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            InferenceChunk::Delta(delta) => text.push_str(&delta),
            InferenceChunk::Usage {
                prompt_tokens,
                completion_tokens,
            } => {
                usage = TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                }
            }
        }
    }

    Ok((text, usage))
}
