use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, Error as ReqwestError, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::ports::InferenceProvider;
use crate::application::ports::inference_provider::{
    ChatMessage, InferenceChunk, InferenceError, InferenceOptions, InferenceStream,
};

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct InferenceClientConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_factor: f64,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct BackendOptions {
    num_ctx: i32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stream_options: StreamOptions,
    /// Context window hint for local backends that honor it.
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<BackendOptions>,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    prompt_tokens: Option<i32>,
    completion_tokens: Option<i32>,
}

/// Parse the `data` field of one streamed chat completion event.
pub fn parse_event_data(data: &str) -> Result<Vec<InferenceChunk>, InferenceError> {
    let chunk: ChatCompletionChunk =
        serde_json::from_str(data).map_err(|e| InferenceError::StreamError(e.to_string()))?;

    let mut chunks: Vec<InferenceChunk> = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(InferenceChunk::Delta)
        .collect();

    if let Some(usage) = chunk.usage {
        chunks.push(InferenceChunk::Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        });
    }

    Ok(chunks)
}

type EventStream = BoxStream<
    'static,
    Result<eventsource_stream::Event, eventsource_stream::EventStreamError<ReqwestError>>,
>;

struct StreamState {
    events: EventStream,
    cancel: CancellationToken,
    pending: VecDeque<InferenceChunk>,
    done: bool,
}

/// Streaming chat completions against an OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: Client,
    config: InferenceClientConfig,
}

impl InferenceClient {
    pub fn new(config: InferenceClientConfig) -> Result<Self, ReqwestError> {
        // No overall timeout: generations run for minutes. Stalls are detected
        // by the caller.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Retries cover only the request itself. Once tokens flow a failure is
    /// reported to the caller.
    async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, InferenceError> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match self.execute_request(request).await {
                Ok(response) => return Ok(response),
                Err(RequestFailure::Fatal(e)) => return Err(e),
                Err(RequestFailure::Retryable(e)) => e,
            };

            if attempts > self.config.max_retries {
                warn!("Inference request failed after {} attempts: {}", attempts, error);
                return Err(InferenceError::ServiceUnavailable(attempts));
            }

            let backoff_time = Duration::from_millis(
                (self.config.backoff_factor.powi(attempts as i32 - 1) * 1000.0) as u64,
            );
            debug!(
                "Inference request attempt {} failed ({}), retrying in {:?}",
                attempts, error, backoff_time
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(InferenceError::NetworkError("request canceled".to_string()));
                }
                _ = tokio::time::sleep(backoff_time) => {}
            }
        }
    }

    async fn execute_request(
        &self,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<reqwest::Response, RequestFailure> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .header("Accept", "text/event-stream")
            .json(request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|e| {
            RequestFailure::Retryable(InferenceError::NetworkError(e.without_url().to_string()))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = InferenceError::ApiError(format!("{}: {}", status, body.trim()));
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(RequestFailure::Retryable(error))
        } else {
            Err(RequestFailure::Fatal(error))
        }
    }
}

enum RequestFailure {
    Retryable(InferenceError),
    Fatal(InferenceError),
}

#[async_trait]
impl InferenceProvider for InferenceClient {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: InferenceOptions,
    ) -> Result<InferenceStream, InferenceError> {
        let request = ChatCompletionRequest {
            model: &options.model,
            messages: &messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            options: options
                .context_size
                .map(|num_ctx| BackendOptions { num_ctx }),
        };

        let response = self.send_with_retry(&request, &options.cancel).await?;
        debug!("Inference stream opened for model {}", options.model);

        let state = StreamState {
            events: response.bytes_stream().eventsource().boxed(),
            cancel: options.cancel,
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Some((Ok(chunk), state));
                }
                if state.done {
                    return None;
                }

                // Dropping the event stream closes the HTTP connection.
                let next = tokio::select! {
                    biased;
                    _ = state.cancel.cancelled() => {
                        debug!("Inference stream canceled");
                        return None;
                    }
                    next = state.events.next() => next,
                };

                match next {
                    None => return None,
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(InferenceError::StreamError(e.to_string())), state));
                    }
                    Some(Ok(event)) => {
                        if event.data.trim() == DONE_MARKER {
                            state.done = true;
                            continue;
                        }
                        match parse_event_data(&event.data) {
                            Ok(chunks) => state.pending.extend(chunks),
                            Err(e) => {
                                state.done = true;
                                return Some((Err(e), state));
                            }
                        }
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
