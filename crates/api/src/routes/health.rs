//! Liveness endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use jobs::JobStore;
use reservations::ReservationStore;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_paused: bool,
}

/// GET /health: process liveness plus the queue pause flag.
pub async fn check<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        queue_paused: state.queue.is_paused(),
    })
}
