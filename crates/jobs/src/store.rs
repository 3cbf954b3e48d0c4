use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::JobId;

use crate::{Job, JobStatus, QueueStats, Result};

/// Outcome of a visibility-timeout scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueOutcome {
    /// Stuck jobs moved back to `Delayed`.
    pub requeued: u64,
    /// Stuck jobs whose attempts were exhausted, moved to `Failed`.
    pub failed: u64,
}

/// Core trait for job storage.
///
/// The store owns every state transition of a job row. Transitions out of
/// `Active` are fenced on the claim: the caller passes the `attempts` value
/// its claim returned, and the row must still be active with that same
/// count. A worker whose job was requeued by the visibility timeout (and
/// possibly claimed again) gets `StaleClaim` or `InvalidState` instead of
/// overwriting the newer claim.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a newly enqueued job.
    async fn insert(&self, job: Job) -> Result<Job>;

    /// Retrieves a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Lists jobs, newest first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>>;

    /// Atomically claims the next due job.
    ///
    /// Picks the `Waiting` or `Delayed` job with the earliest `run_at <= now`,
    /// moves it to `Active`, stamps `claimed_at`, and increments `attempts`.
    /// At most one caller can claim a given job.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Marks the job completed if claim `attempt` still holds it.
    async fn complete(&self, id: JobId, attempt: u32, at: DateTime<Utc>) -> Result<Job>;

    /// Records a failed delivery if claim `attempt` still holds the job.
    ///
    /// With `retry_at`, and attempts left on the stored row, the job becomes
    /// `Delayed` until then; otherwise it becomes terminally `Failed`.
    async fn fail(
        &self,
        id: JobId,
        attempt: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Job>;

    /// Recovers jobs left `Active` with `claimed_at <= claimed_before`.
    ///
    /// Jobs with attempts left become `Delayed` and due at `now`; the rest
    /// become `Failed`.
    async fn requeue_stuck(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RequeueOutcome>;

    /// Deletes `Completed` and `Failed` jobs processed at or before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Counts jobs by status. `paused` is left false.
    async fn counts(&self) -> Result<QueueStats>;
}
