use common::{ReservationId, SubjectRef};
use thiserror::Error;

use crate::ReservationStatus;

/// Errors that can occur when reserving, committing, or releasing stock.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// Not enough unreserved stock to satisfy the request.
    #[error("Insufficient stock for {subject}: requested {requested}, available {available}")]
    InsufficientStock {
        subject: SubjectRef,
        requested: u32,
        available: u32,
    },

    /// The reservation does not exist.
    #[error("Reservation not found: {0}")]
    NotFound(ReservationId),

    /// The reservation is not in a state that allows the transition.
    #[error("Invalid state for reservation {id}: expected {expected}, found {actual}")]
    InvalidState {
        id: ReservationId,
        expected: ReservationStatus,
        actual: ReservationStatus,
    },

    /// Reservation quantity must be positive.
    #[error("Reservation quantity must be positive")]
    InvalidQuantity,

    /// Reservation time-to-live must be positive and yield a representable expiry.
    #[error("Reservation TTL out of range: {seconds}s")]
    InvalidTtl { seconds: i64 },

    /// A stored row could not be decoded.
    #[error("Corrupt reservation row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for reservation operations.
pub type Result<T> = std::result::Result<T, ReservationError>;
