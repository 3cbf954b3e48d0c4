//! Stock ledger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use jobs::JobStore;
use reservations::{ReservationStore, StockLevel, SubjectRef};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub success: bool,
    pub subject_ref: SubjectRef,
    #[serde(flatten)]
    pub level: StockLevel,
}

/// PUT /stock/:subject: set the on-hand quantity of a subject.
#[tracing::instrument(skip(state, req))]
pub async fn set<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Path(subject): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let subject = parse_subject(subject)?;
    state.reservations.set_stock(&subject, req.quantity).await?;
    level_response(&state, subject).await
}

/// GET /stock/:subject: on-hand, reserved and available units.
#[tracing::instrument(skip(state))]
pub async fn get<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Path(subject): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let subject = parse_subject(subject)?;
    level_response(&state, subject).await
}

async fn level_response<R: ReservationStore + 'static, J: JobStore + 'static>(
    state: &AppState<R, J>,
    subject: SubjectRef,
) -> Result<Json<StockResponse>, ApiError> {
    let level = state
        .reservations
        .stock_level(&subject)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No stock recorded for {subject}")))?;

    Ok(Json(StockResponse {
        success: true,
        subject_ref: subject,
        level,
    }))
}

fn parse_subject(subject: String) -> Result<SubjectRef, ApiError> {
    if subject.trim().is_empty() {
        return Err(ApiError::BadRequest("subject_ref must not be empty".to_string()));
    }
    Ok(SubjectRef::new(subject))
}
