//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jobs::JobError;
use reservations::ReservationError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// The caller does not own the resource.
    #[error("{0}")]
    Forbidden(String),
    /// The request conflicts with the current state.
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    #[error(transparent)]
    Job(#[from] JobError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Reservation(err) => reservation_status(err),
            ApiError::Job(err) => job_status(err),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal server error");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

fn reservation_status(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::InsufficientStock { .. } | ReservationError::InvalidState { .. } => {
            StatusCode::CONFLICT
        }
        ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::InvalidQuantity | ReservationError::InvalidTtl { .. } => {
            StatusCode::BAD_REQUEST
        }
        ReservationError::Decode(_)
        | ReservationError::Database(_)
        | ReservationError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn job_status(err: &JobError) -> StatusCode {
    match err {
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::InvalidState { .. } | JobError::StaleClaim { .. } => StatusCode::CONFLICT,
        JobError::InvalidMaxAttempts
        | JobError::InvalidRetention { .. }
        | JobError::InvalidDelay { .. } => StatusCode::BAD_REQUEST,
        JobError::Decode(_) | JobError::Database(_) | JobError::Migration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
