use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::error::ApiError;
use super::models::{HealthResponse, ListJobsQuery, SubmitJobRequest, SubmitJobResponse};
use super::state::AppState;
use crate::job::JobId;
use crate::orchestrator::{CancelError, CancelOutcome, ServiceStatus, SubmitError, SubmitOutcome};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Submit a download (POST /jobs)
///
/// 202 Accepted with the new job id, or 200 OK with the existing id when
/// the request deduplicated onto an active job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state
        .orchestrator
        .submit(&payload.url, payload.options, payload.requester)
    {
        Ok(SubmitOutcome::Enqueued(snapshot)) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitJobResponse {
                job_id: snapshot.id,
                state: snapshot.state,
                deduplicated: false,
            }),
        )),
        Ok(SubmitOutcome::AttachedExisting(snapshot)) => Ok((
            StatusCode::OK,
            Json(SubmitJobResponse {
                job_id: snapshot.id,
                state: snapshot.state,
                deduplicated: true,
            }),
        )),
        Err(SubmitError::InvalidUrl(message)) => Err(ApiError::InvalidPayload(message)),
    }
}

/// Job status (GET /jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .orchestrator
        .status(job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;
    Ok((StatusCode::OK, Json(snapshot)))
}

/// Job listing in creation order (GET /jobs)
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let jobs = state.orchestrator.list(query.state, query.after, limit);
    (StatusCode::OK, Json(jobs))
}

/// Cancel a job (DELETE /jobs/{job_id})
///
/// Idempotent: cancelling a finished job returns its snapshot unchanged.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.cancel(job_id).await {
        Ok(CancelOutcome::Cancelled(snapshot))
        | Ok(CancelOutcome::CancelRequested(snapshot))
        | Ok(CancelOutcome::AlreadyTerminal(snapshot)) => Ok((StatusCode::OK, Json(snapshot))),
        Err(CancelError::NotFound(id)) => Err(ApiError::NotFound(format!("job {id}"))),
    }
}

/// Health check (GET /health)
///
/// 503 when the downloader binary is unreachable or the worker pool is
/// saturated beyond the configured threshold.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.orchestrator.health().await;

    let status_code = match health.status {
        ServiceStatus::Ok => StatusCode::OK,
        ServiceStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status: match health.status {
            ServiceStatus::Ok => "ok".to_string(),
            ServiceStatus::Degraded => "degraded".to_string(),
        },
        downloader_version: health.downloader_version,
        downloader_error: health.downloader_error,
        queued: health.queued,
        running: health.running,
        saturated: health.saturated,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
