use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
};
use futures::stream::{self, Stream, StreamExt};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::debug;

use crate::application::ports::{AnalysisEvent, ProgressPublisher};
use crate::application::use_cases::{GetAnalysisJobError, GetAnalysisJobUseCase};
use crate::infrastructure::messaging::ProgressBroadcaster;
use crate::presentation::http::dto::{AnalysisJobDto, ApiResponse};

pub struct SseHandler {
    get_job_use_case: Arc<GetAnalysisJobUseCase>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl SseHandler {
    pub fn new(
        get_job_use_case: Arc<GetAnalysisJobUseCase>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            get_job_use_case,
            broadcaster,
        }
    }

    /// Sends a `snapshot` of the stored job, then live progress until the job
    /// reaches a terminal state.
    pub async fn job_events(
        State(handler): State<Arc<SseHandler>>,
        Path(job_id): Path<i32>,
    ) -> Response {
        // Subscribe before reading the snapshot so no event falls in between.
        let receiver = handler.broadcaster.subscribe(job_id);

        let details = match handler.get_job_use_case.execute(job_id).await {
            Ok(details) => details,
            Err(e) => {
                drop(receiver);
                let (status, code) = match &e {
                    GetAnalysisJobError::JobNotFound(_) => {
                        handler.broadcaster.close(job_id);
                        (StatusCode::NOT_FOUND, "JOB_NOT_FOUND")
                    }
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "FETCH_FAILED"),
                };
                return (
                    status,
                    Json(ApiResponse::<()>::error(
                        code,
                        e.to_string(),
                    )),
                )
                    .into_response();
            }
        };

        let snapshot = AnalysisJobDto::from(details);
        let snapshot_event = Event::default()
            .event("snapshot")
            .data(serde_json::to_string(&snapshot).unwrap_or_default());

        if snapshot.is_terminal {
            drop(receiver);
            handler.broadcaster.close(job_id);
            return create_sse_response(stream::iter([Ok(snapshot_event)]));
        }

        let live = live_events(receiver);
        create_sse_response(stream::iter([Ok(snapshot_event)]).chain(live))
    }
}

fn to_sse_event(event: &AnalysisEvent) -> Event {
    Event::default()
        .event(event.kind.name())
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// Ends after the terminal status event or when the channel closes.
fn live_events(
    receiver: Receiver<AnalysisEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(Some(receiver), |state| async move {
        let mut receiver = state?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let next = if event.is_terminal() {
                        None
                    } else {
                        Some(receiver)
                    };
                    return Some((Ok(to_sse_event(&event)), next));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("SSE subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

pub fn create_sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("keep-alive"),
        )
        .into_response()
}
