use super::dto::{ListJobsQuery, SubmitJobRequest};
use super::error::StoreError;
use super::model::Job;
use super::service::JobService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

/// Submit a render job
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body = SubmitJobRequest,
    responses(
        (status = 201, description = "Job queued", body = ApiResponse<Job>),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Job ID already used")
    ),
    tag = "Jobs"
)]
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    if let Err(e) = payload.validate() {
        return ApiError::bad_request(e).into_response();
    }

    match JobService::submit(state, payload).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job queued successfully"),
            StatusCode::CREATED,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// List jobs, newest first
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "List of jobs", body = ApiResponse<Vec<Job>>)
    ),
    tag = "Jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    match JobService::list(state, query).await {
        Ok(jobs) => ApiSuccess(
            ApiResponse::success(jobs, "Jobs retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Get job by ID
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = ApiResponse<Job>),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match JobService::get(state, id).await {
        Ok(Some(job)) => ApiSuccess(
            ApiResponse::success(job, "Job retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Ok(None) => ApiError::from(StoreError::NotFound(id)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
