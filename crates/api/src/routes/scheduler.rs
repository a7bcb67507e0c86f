use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use workgate_models::{
    CompleteLeaseRequest, CompleteLeaseResponse, HeartbeatRequest, HeartbeatResponse,
    HistoryStats, Job, JobListResponse, JobState, RequestLeaseRequest, RequestLeaseResponse,
    SchedulerError, SchedulerSnapshot, SubmitJobRequest, SubmitJobResponse,
};

use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/scheduler/jobs", post(submit_job).get(list_jobs))
        .route("/scheduler/jobs/:job_id", get(get_job))
        .route("/scheduler/leases/request", post(request_lease))
        .route("/scheduler/leases/:lease_id/heartbeat", post(heartbeat))
        .route("/scheduler/leases/:lease_id/complete", post(complete))
        .route("/scheduler/status", get(status))
        .route("/scheduler/history/stats", get(history_stats))
        .route("/scheduler/history/cleanup", post(history_cleanup))
}

async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let job = state.engine.submit(request).await?;
    Ok(Json(SubmitJobResponse {
        job_id: job.job_id,
        state: job.state,
    }))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    limit: Option<usize>,
    state: Option<String>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let filter = query
        .state
        .as_deref()
        .map(|raw| {
            raw.parse::<JobState>()
                .map_err(|reason| SchedulerError::InvalidArguments { reason })
        })
        .transpose()?;
    let limit = query.limit.unwrap_or(100).min(1000);

    let (jobs, total) = state.engine.list_jobs(filter, limit).await;
    Ok(Json(JobListResponse { jobs, total }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .engine
        .get_job(&job_id)
        .await
        .ok_or(SchedulerError::JobNotFound { job_id })?;
    Ok(Json(job))
}

async fn request_lease(
    State(state): State<AppState>,
    Json(request): Json<RequestLeaseRequest>,
) -> Json<RequestLeaseResponse> {
    Json(state.engine.request_lease(request).await)
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(lease_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let lease = state.engine.heartbeat(&lease_id, &request.worker_id).await?;
    Ok(Json(HeartbeatResponse {
        ok: true,
        expires_at: lease.expires_at,
    }))
}

async fn complete(
    State(state): State<AppState>,
    Path(lease_id): Path<String>,
    Json(request): Json<CompleteLeaseRequest>,
) -> Result<Json<CompleteLeaseResponse>, ApiError> {
    state
        .engine
        .complete(
            &lease_id,
            &request.worker_id,
            request.status,
            request.result,
            request.error,
        )
        .await?;
    Ok(Json(CompleteLeaseResponse { ok: true }))
}

async fn status(State(state): State<AppState>) -> Json<SchedulerSnapshot> {
    Json(state.engine.snapshot().await)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

async fn history_stats(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryStats>, ApiError> {
    let days = normalize_days(query.days, &state)?;
    let stats = state.history.stats(days, Utc::now()).await?;
    Ok(Json(stats))
}

async fn history_cleanup(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let days = normalize_days(query.days, &state)?;
    let deleted = state.history.cleanup(days, Utc::now()).await?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

fn normalize_days(days: Option<i64>, state: &AppState) -> Result<i64, SchedulerError> {
    let days = days.unwrap_or(state.config.storage.history_retention_days as i64);
    if days < 1 {
        return Err(SchedulerError::InvalidArguments {
            reason: "days must be at least 1".to_string(),
        });
    }
    Ok(days)
}
