use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;

use crate::application::ports::JobQueue;
use crate::application::use_cases::{
    CancelAnalysisJobError, CancelAnalysisJobUseCase, CreateAnalysisJobError,
    CreateAnalysisJobRequest, CreateAnalysisJobUseCase, DeleteAnalysisJobError,
    DeleteAnalysisJobUseCase, GetAnalysisJobError, GetAnalysisJobUseCase,
};
use crate::presentation::http::dto::{
    AnalysisJobDto, AnalysisJobListItemDto, ApiResponse, CancelAnalysisJobResponseDto,
    CreateAnalysisJobRequestDto, CreateAnalysisJobResponseDto, MessageResponseDto,
};

pub struct AnalysisHandler {
    create_job_use_case: Arc<CreateAnalysisJobUseCase>,
    get_job_use_case: Arc<GetAnalysisJobUseCase>,
    cancel_job_use_case: Arc<CancelAnalysisJobUseCase>,
    delete_job_use_case: Arc<DeleteAnalysisJobUseCase>,
    job_queue: Arc<dyn JobQueue>,
}

impl AnalysisHandler {
    pub fn new(
        create_job_use_case: Arc<CreateAnalysisJobUseCase>,
        get_job_use_case: Arc<GetAnalysisJobUseCase>,
        cancel_job_use_case: Arc<CancelAnalysisJobUseCase>,
        delete_job_use_case: Arc<DeleteAnalysisJobUseCase>,
        job_queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            create_job_use_case,
            get_job_use_case,
            cancel_job_use_case,
            delete_job_use_case,
            job_queue,
        }
    }

    pub async fn create_job(
        State(handler): State<Arc<AnalysisHandler>>,
        payload: Result<Json<CreateAnalysisJobRequestDto>, JsonRejection>,
    ) -> Result<impl IntoResponse, StatusCode> {
        let Json(request) = match payload {
            Ok(request) => request,
            Err(rejection) => {
                return Ok((
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::<CreateAnalysisJobResponseDto>::error(
                        "INVALID_REQUEST",
                        "Request body is not a valid analysis request",
                    )
                    .with_details(rejection.body_text())),
                ));
            }
        };

        let request = CreateAnalysisJobRequest {
            prompt: request.prompt,
            session_ids: request.session_ids,
            model_name: request.model_name,
            use_advanced_strategy: request.use_advanced_strategy,
        };

        match handler.create_job_use_case.execute(request).await {
            Ok(response) => {
                let dto = CreateAnalysisJobResponseDto::from(response);
                Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(dto))))
            }
            Err(e) => {
                let (status, code) = match &e {
                    CreateAnalysisJobError::ValidationError(_) => {
                        (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
                    }
                    CreateAnalysisJobError::SessionNotFound(_) => {
                        (StatusCode::BAD_REQUEST, "SESSION_NOT_FOUND")
                    }
                    CreateAnalysisJobError::BudgetExceeded(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "CONTEXT_BUDGET_EXCEEDED")
                    }
                    CreateAnalysisJobError::RepositoryError(_)
                    | CreateAnalysisJobError::QueueError(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "CREATE_FAILED")
                    }
                };
                Ok((
                    status,
                    Json(ApiResponse::error(code, e.to_string())),
                ))
            }
        }
    }

    pub async fn list_jobs(
        State(handler): State<Arc<AnalysisHandler>>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match handler.get_job_use_case.list().await {
            Ok(jobs) => {
                let dtos: Vec<AnalysisJobListItemDto> =
                    jobs.iter().map(AnalysisJobListItemDto::from).collect();
                Ok((StatusCode::OK, Json(ApiResponse::success(dtos))))
            }
            Err(e) => Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "LIST_FAILED",
                    e.to_string(),
                )),
            )),
        }
    }

    pub async fn get_job(
        State(handler): State<Arc<AnalysisHandler>>,
        Path(job_id): Path<i32>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match handler.get_job_use_case.execute(job_id).await {
            Ok(details) => {
                let dto = AnalysisJobDto::from(details);
                Ok((StatusCode::OK, Json(ApiResponse::success(dto))))
            }
            Err(GetAnalysisJobError::JobNotFound(_)) => Ok((
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(
                    "JOB_NOT_FOUND",
                    format!("Analysis job {} not found", job_id),
                )),
            )),
            Err(e) => Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "FETCH_FAILED",
                    e.to_string(),
                )),
            )),
        }
    }

    pub async fn cancel_job(
        State(handler): State<Arc<AnalysisHandler>>,
        Path(job_id): Path<i32>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match handler.cancel_job_use_case.execute(job_id).await {
            Ok(response) => {
                let dto = CancelAnalysisJobResponseDto::from(response);
                Ok((StatusCode::OK, Json(ApiResponse::success(dto))))
            }
            Err(e) => {
                let (status, code) = match &e {
                    CancelAnalysisJobError::JobNotFound(_) => {
                        (StatusCode::NOT_FOUND, "JOB_NOT_FOUND")
                    }
                    CancelAnalysisJobError::JobNotCancellable(_) => {
                        (StatusCode::CONFLICT, "JOB_NOT_CANCELLABLE")
                    }
                    CancelAnalysisJobError::RepositoryError(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "CANCEL_FAILED")
                    }
                };
                Ok((
                    status,
                    Json(ApiResponse::error(code, e.to_string())),
                ))
            }
        }
    }

    pub async fn delete_job(
        State(handler): State<Arc<AnalysisHandler>>,
        Path(job_id): Path<i32>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match handler.delete_job_use_case.execute(job_id).await {
            Ok(()) => Ok((
                StatusCode::OK,
                Json(ApiResponse::success(MessageResponseDto::new(format!(
                    "Analysis job {} deleted",
                    job_id
                )))),
            )),
            Err(DeleteAnalysisJobError::JobNotFound(_)) => Ok((
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(
                    "JOB_NOT_FOUND",
                    format!("Analysis job {} not found", job_id),
                )),
            )),
            Err(e) => Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "DELETE_FAILED",
                    e.to_string(),
                )),
            )),
        }
    }

    pub async fn queue_health(
        State(handler): State<Arc<AnalysisHandler>>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match handler.job_queue.health_check().await {
            Ok(health) => Ok((StatusCode::OK, Json(ApiResponse::success(health)))),
            Err(e) => Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error(
                    "QUEUE_UNAVAILABLE",
                    e.to_string(),
                )),
            )),
        }
    }
}
