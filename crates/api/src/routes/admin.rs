//! Operator endpoints for reservations and the job queue.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use jobs::{Job, JobId, JobStatus, JobStore, QueueStats};
use reservations::{ReleaseReason, Reservation, ReservationStore};
use serde::{Deserialize, Serialize};

use super::reservations::{ReservationResponse, parse_reservation_id};
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_JOB_LIST_LIMIT: usize = 50;
const MAX_JOB_LIST_LIMIT: usize = 500;

// -- Request types --

#[derive(Deserialize)]
pub struct CleanRequest {
    pub retention_seconds: i64,
}

#[derive(Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationListResponse {
    pub success: bool,
    pub count: usize,
    pub reservations: Vec<Reservation>,
}

#[derive(Serialize)]
pub struct SweepResponse {
    pub success: bool,
    pub expired: usize,
}

#[derive(Serialize)]
pub struct QueueStatsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub stats: QueueStats,
}

#[derive(Serialize)]
pub struct PauseResponse {
    pub success: bool,
    pub paused: bool,
}

#[derive(Serialize)]
pub struct CleanResponse {
    pub success: bool,
    pub deleted: u64,
}

#[derive(Serialize)]
pub struct JobResponse {
    pub success: bool,
    pub job: Job,
}

#[derive(Serialize)]
pub struct JobListResponse {
    pub success: bool,
    pub count: usize,
    pub jobs: Vec<Job>,
}

// -- Reservation handlers --

/// GET /admin/reservations: active holds, most recent first.
pub async fn list_reservations<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
) -> Result<Json<ReservationListResponse>, ApiError> {
    let reservations = state.reservations.list_active().await?;
    Ok(Json(ReservationListResponse {
        success: true,
        count: reservations.len(),
        reservations,
    }))
}

/// POST /admin/reservations/:id/release: cancel any active hold.
#[tracing::instrument(skip(state))]
pub async fn release_reservation<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let reservation = state
        .reservations
        .release(id, ReleaseReason::Cancelled)
        .await?;
    Ok(Json(ReservationResponse {
        success: true,
        reservation,
    }))
}

/// POST /admin/reservations/sweep: expire lapsed holds now.
#[tracing::instrument(skip(state))]
pub async fn sweep<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
) -> Result<Json<SweepResponse>, ApiError> {
    let expired = state.sweeper.sweep_expired().await?;
    Ok(Json(SweepResponse {
        success: true,
        expired,
    }))
}

// -- Queue handlers --

/// GET /admin/queue/stats: job counts by status and the pause flag.
pub async fn queue_stats<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
) -> Result<Json<QueueStatsResponse>, ApiError> {
    let stats = state.queue.stats().await?;
    Ok(Json(QueueStatsResponse {
        success: true,
        stats,
    }))
}

/// POST /admin/queue/pause
pub async fn pause<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
) -> Json<PauseResponse> {
    state.queue.pause();
    Json(PauseResponse {
        success: true,
        paused: state.queue.is_paused(),
    })
}

/// POST /admin/queue/resume
pub async fn resume<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
) -> Json<PauseResponse> {
    state.queue.resume();
    Json(PauseResponse {
        success: true,
        paused: state.queue.is_paused(),
    })
}

/// POST /admin/queue/clean: delete finished jobs older than the retention window.
#[tracing::instrument(skip(state, req), fields(retention_seconds = req.retention_seconds))]
pub async fn clean<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Json(req): Json<CleanRequest>,
) -> Result<Json<CleanResponse>, ApiError> {
    let retention = chrono::Duration::try_seconds(req.retention_seconds).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "retention_seconds out of range: {}",
            req.retention_seconds
        ))
    })?;
    let deleted = state.queue.clean(retention).await?;
    Ok(Json(CleanResponse {
        success: true,
        deleted,
    }))
}

/// GET /admin/queue/jobs?status=&limit=: newest jobs first.
pub async fn list_jobs<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::parse)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_JOB_LIST_LIMIT)
        .min(MAX_JOB_LIST_LIMIT);

    let jobs = state.queue.list(status, limit).await?;
    Ok(Json(JobListResponse {
        success: true,
        count: jobs.len(),
        jobs,
    }))
}

/// GET /admin/queue/jobs/:id
pub async fn get_job<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = uuid::Uuid::parse_str(&id)
        .map(JobId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid job id: {e}")))?;
    let job = state.queue.get(id).await?;
    Ok(Json(JobResponse { success: true, job }))
}
