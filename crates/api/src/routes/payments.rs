//! Payment confirmation webhook.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use jobs::{JobId, JobKind, JobStore};
use reservations::{OwnerRef, ReservationId, ReservationStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PaymentConfirmedRequest {
    /// The order whose holds were paid for.
    pub owner_ref: String,
    /// Recipient of the confirmation email.
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct CommitFailure {
    pub reservation_id: ReservationId,
    pub error: String,
}

#[derive(Serialize)]
pub struct PaymentConfirmedResponse {
    /// False when any hold could not be committed.
    pub success: bool,
    pub committed: usize,
    pub failures: Vec<CommitFailure>,
    pub job_id: JobId,
}

/// POST /payments/confirmed: commit every active hold of an order and
/// queue its confirmation email.
///
/// Holds are committed one by one. A hold that fails (for example because the
/// ledger was lowered below it) is reported without undoing the others. With
/// nothing committed no email is queued and the call fails with 409.
#[tracing::instrument(skip(state, req), fields(owner = %req.owner_ref))]
pub async fn confirmed<R: ReservationStore + 'static, J: JobStore + 'static>(
    State(state): State<Arc<AppState<R, J>>>,
    Json(req): Json<PaymentConfirmedRequest>,
) -> Result<Json<PaymentConfirmedResponse>, ApiError> {
    let owner = OwnerRef::new(req.owner_ref);
    let holds = state.reservations.list_active_for_owner(&owner).await?;
    if holds.is_empty() {
        return Err(ApiError::Conflict(format!(
            "No active reservations for {owner}"
        )));
    }

    let mut committed = Vec::with_capacity(holds.len());
    let mut failures = Vec::new();
    for hold in holds {
        match state.reservations.commit(hold.id).await {
            Ok(reservation) => committed.push(reservation),
            Err(e) => {
                tracing::warn!(reservation_id = %hold.id, error = %e, "hold not committed");
                failures.push(CommitFailure {
                    reservation_id: hold.id,
                    error: e.to_string(),
                });
            }
        }
    }

    if committed.is_empty() {
        return Err(ApiError::Conflict(format!(
            "No reservation of {owner} could be committed"
        )));
    }

    let items: Vec<_> = committed
        .iter()
        .map(|r| {
            serde_json::json!({
                "reservation_id": r.id,
                "subject_ref": r.subject_ref,
                "quantity": r.quantity,
            })
        })
        .collect();
    let job = state
        .queue
        .enqueue(
            JobKind::OrderConfirmation,
            serde_json::json!({
                "owner_ref": owner,
                "email": req.email,
                "items": items,
            }),
        )
        .await?;

    Ok(Json(PaymentConfirmedResponse {
        success: failures.is_empty(),
        committed: committed.len(),
        failures,
        job_id: job.id,
    }))
}
