use axum::{Router, routing::get, routing::post};
use std::sync::Arc;

use crate::presentation::http::handlers::{AnalysisHandler, SseHandler};

pub fn analysis_routes(analysis_handler: Arc<AnalysisHandler>, sse_handler: Arc<SseHandler>) -> Router {
    Router::new()
        .route(
            "/analysis/jobs",
            post(AnalysisHandler::create_job).get(AnalysisHandler::list_jobs),
        )
        .route(
            "/analysis/jobs/{job_id}",
            get(AnalysisHandler::get_job).delete(AnalysisHandler::delete_job),
        )
        .route("/analysis/jobs/{job_id}/cancel", post(AnalysisHandler::cancel_job))
        .route("/analysis/queue", get(AnalysisHandler::queue_health))
        .nest(
            "/analysis/jobs",
            Router::new()
                .route("/{job_id}/events", get(SseHandler::job_events))
                .with_state(sse_handler),
        )
        .with_state(analysis_handler)
}
