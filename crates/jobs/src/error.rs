//! Job queue error types.

use common::JobId;
use thiserror::Error;

use crate::JobStatus;

/// Errors that can occur when enqueueing, claiming, or recording jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job does not exist (never created, or already cleaned).
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The job is not in a state that allows the transition.
    #[error("Invalid state for job {id}: expected {expected}, found {actual}")]
    InvalidState {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The job was claimed again after this claim timed out.
    #[error("Stale claim on job {id}: attempt {attempt} was superseded by attempt {current}")]
    StaleClaim { id: JobId, attempt: u32, current: u32 },

    /// `max_attempts` must allow at least one delivery.
    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,

    /// Retention windows must be non-negative and fit a timestamp.
    #[error("Retention window out of range: {seconds}s")]
    InvalidRetention { seconds: i64 },

    /// The enqueue delay does not fit a timestamp.
    #[error("Enqueue delay out of range: {seconds}s")]
    InvalidDelay { seconds: i64 },

    /// A stored row could not be decoded.
    #[error("Corrupt job row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Failure reported by the email transport.
///
/// Never surfaced to the enqueueing caller: the worker records it on the job
/// and retries according to the backoff policy.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The transport could not be reached or timed out.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The transport refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Convenience type alias for job queue results.
pub type Result<T> = std::result::Result<T, JobError>;
