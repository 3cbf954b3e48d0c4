//! Checkout endpoints: place, commit and cancel holds.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use jobs::JobStore;
use reservations::{
    OwnerRef, ReleaseReason, Reservation, ReservationError, ReservationId, ReservationStore,
    SubjectRef,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub subject_ref: String,
    pub quantity: u32,
    pub owner_ref: String,
    /// Overrides the configured hold lifetime.
    pub ttl_seconds: Option<i64>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub owner_ref: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationResponse {
    pub success: bool,
    pub reservation: Reservation,
}

// -- Handlers --

/// POST /reservations: place a hold for a checkout.
#[tracing::instrument(skip(state, req), fields(subject = %req.subject_ref, owner = %req.owner_ref))]
pub async fn create<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    if req.subject_ref.trim().is_empty() || req.owner_ref.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "subject_ref and owner_ref are required".to_string(),
        ));
    }
    let ttl = match req.ttl_seconds {
        Some(seconds) => chrono::Duration::try_seconds(seconds)
            .ok_or(ReservationError::InvalidTtl { seconds })?,
        None => state.reservation_ttl,
    };

    let reservation = state
        .reservations
        .reserve(
            SubjectRef::new(req.subject_ref),
            req.quantity,
            OwnerRef::new(req.owner_ref),
            ttl,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse {
            success: true,
            reservation,
        }),
    ))
}

/// POST /reservations/:id/commit: apply a hold to the stock ledger.
#[tracing::instrument(skip(state))]
pub async fn commit<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let reservation = state.reservations.commit(id).await?;
    Ok(Json(ReservationResponse {
        success: true,
        reservation,
    }))
}

/// POST /reservations/:id/cancel: the owning checkout gives a hold back.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let existing = state.reservations.get(id).await?;
    if existing.owner_ref.as_str() != req.owner_ref {
        return Err(ApiError::Forbidden(format!(
            "Reservation {id} does not belong to {}",
            req.owner_ref
        )));
    }

    let reservation = state
        .reservations
        .release(id, ReleaseReason::Cancelled)
        .await?;
    Ok(Json(ReservationResponse {
        success: true,
        reservation,
    }))
}

/// Parses a reservation id path segment.
pub fn parse_reservation_id(id: &str) -> Result<ReservationId, ApiError> {
    uuid::Uuid::parse_str(id)
        .map(ReservationId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid reservation id: {e}")))
}
