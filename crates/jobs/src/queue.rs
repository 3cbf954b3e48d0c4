//! Producer and operator side of the job queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration;
use common::{Clock, JobId, SystemClock};
use tokio::sync::Notify;

use crate::store::JobStore;
use crate::{EnqueueOptions, Job, JobError, JobKind, JobStatus, QueueStats, Result};

/// Default attempt ceiling for new jobs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Durable queue of notification jobs.
///
/// Cloning is cheap and every clone shares the same pause flag and wake-up
/// signal, so workers built from a clone observe `pause` and `enqueue` calls
/// made through any other.
pub struct JobQueue<S: JobStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    paused: Arc<AtomicBool>,
    notify: Arc<Notify>,
    default_max_attempts: u32,
}

impl<S: JobStore> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            paused: Arc::clone(&self.paused),
            notify: Arc::clone(&self.notify),
            default_max_attempts: self.default_max_attempts,
        }
    }
}

impl<S: JobStore> JobQueue<S> {
    /// Creates an unpaused queue using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(store),
            clock,
            paused: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the attempt ceiling applied when enqueue options leave it unset.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(JobError::InvalidMaxAttempts);
        }
        self.default_max_attempts = max_attempts;
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn default_max_attempts(&self) -> u32 {
        self.default_max_attempts
    }

    pub(crate) fn notifier(&self) -> &Arc<Notify> {
        &self.notify
    }

    /// Enqueues a job that is claimable immediately.
    pub async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Job> {
        self.enqueue_with(kind, payload, EnqueueOptions::default())
            .await
    }

    /// Enqueues a job with an optional delay and attempt ceiling.
    ///
    /// Never blocked by [`pause`](Self::pause).
    #[tracing::instrument(skip(self, payload))]
    pub async fn enqueue_with(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Job> {
        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(JobError::InvalidMaxAttempts);
        }

        let job = Job::new(kind, payload, max_attempts, self.clock.now(), options.delay)?;
        let job = self.store.insert(job).await?;

        metrics::counter!("jobs_enqueued_total", "kind" => kind.as_str()).increment(1);
        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            run_at = %job.run_at,
            "job enqueued"
        );

        if job.status == JobStatus::Waiting {
            self.notify.notify_one();
        }
        Ok(job)
    }

    /// Stops workers from claiming new jobs. Active jobs run to completion.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("job queue paused");
        }
    }

    /// Lets workers claim jobs again and wakes them.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("job queue resumed");
        }
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Deletes completed and failed jobs processed `retention` or more ago.
    ///
    /// A zero retention deletes every finished job. Waiting, active and
    /// delayed jobs are never touched, however old.
    #[tracing::instrument(skip(self), fields(retention_secs = retention.num_seconds()))]
    pub async fn clean(&self, retention: Duration) -> Result<u64> {
        let invalid = || JobError::InvalidRetention {
            seconds: retention.num_seconds(),
        };
        if retention < Duration::zero() {
            return Err(invalid());
        }

        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(retention)
            .ok_or_else(invalid)?;
        let deleted = self.store.delete_terminal_before(cutoff).await?;
        tracing::info!(deleted, %cutoff, "terminal jobs cleaned");
        Ok(deleted)
    }

    /// Job counts by status, plus the pause flag.
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut stats = self.store.counts().await?;
        stats.paused = self.is_paused();
        Ok(stats)
    }

    pub async fn get(&self, id: JobId) -> Result<Job> {
        self.store.get(id).await?.ok_or(JobError::NotFound(id))
    }

    /// Lists jobs, newest first.
    pub async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        self.store.list(status, limit).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::ManualClock;

    use super::*;
    use crate::InMemoryJobStore;

    fn queue() -> (JobQueue<InMemoryJobStore>, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let queue = JobQueue::with_clock(InMemoryJobStore::new(), Arc::new(clock.clone()));
        (queue, clock)
    }

    #[tokio::test]
    async fn enqueue_creates_waiting_job() {
        let (queue, _) = queue();

        let job = queue
            .enqueue(JobKind::Welcome, serde_json::json!({"to": "a@example.com"}))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(queue.get(job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn enqueue_with_delay_creates_delayed_job() {
        let (queue, clock) = queue();

        let job = queue
            .enqueue_with(
                JobKind::OrderShipped,
                serde_json::json!({}),
                EnqueueOptions::new()
                    .delay(Duration::seconds(60))
                    .max_attempts(5),
            )
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Delayed);
        assert_eq!(job.run_at, clock.now() + Duration::seconds(60));
        assert_eq!(job.max_attempts, 5);
    }

    #[tokio::test]
    async fn zero_max_attempts_is_rejected() {
        let (queue, _) = queue();

        let result = queue
            .enqueue_with(
                JobKind::Welcome,
                serde_json::json!({}),
                EnqueueOptions::new().max_attempts(0),
            )
            .await;

        assert!(matches!(result, Err(JobError::InvalidMaxAttempts)));
        assert!(matches!(
            JobQueue::new(InMemoryJobStore::new()).with_max_attempts(0),
            Err(JobError::InvalidMaxAttempts)
        ));
    }

    #[tokio::test]
    async fn pause_is_shared_between_clones_and_does_not_block_enqueue() {
        let (queue, _) = queue();
        let other = queue.clone();

        queue.pause();
        other
            .enqueue(JobKind::PasswordReset, serde_json::json!({}))
            .await
            .unwrap();

        let stats = other.stats().await.unwrap();
        assert!(stats.paused);
        assert_eq!(stats.waiting, 1);

        other.resume();
        assert!(!queue.is_paused());
    }

    #[tokio::test]
    async fn negative_retention_is_rejected() {
        let (queue, _) = queue();

        let result = queue.clean(Duration::seconds(-1)).await;

        assert!(matches!(
            result,
            Err(JobError::InvalidRetention { seconds: -1 })
        ));
    }

    #[tokio::test]
    async fn retention_past_the_timestamp_range_is_rejected() {
        let (queue, _) = queue();

        let result = queue
            .clean(Duration::seconds(1_000_000_000_000_000))
            .await;

        assert!(matches!(result, Err(JobError::InvalidRetention { .. })));
    }

    #[tokio::test]
    async fn zero_retention_deletes_jobs_finished_now() {
        let (queue, clock) = queue();
        let job = queue
            .enqueue(JobKind::Welcome, serde_json::json!({}))
            .await
            .unwrap();
        let claimed = queue.store().claim_next(clock.now()).await.unwrap().unwrap();
        queue
            .store()
            .complete(job.id, claimed.attempts, clock.now())
            .await
            .unwrap();

        assert_eq!(queue.clean(Duration::zero()).await.unwrap(), 1);
        assert!(matches!(queue.get(job.id).await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn oversized_enqueue_delay_is_rejected() {
        let (queue, _) = queue();

        let result = queue
            .enqueue_with(
                JobKind::Welcome,
                serde_json::json!({}),
                EnqueueOptions::new().delay(Duration::seconds(1_000_000_000_000_000)),
            )
            .await;

        assert!(matches!(result, Err(JobError::InvalidDelay { .. })));
        assert_eq!(queue.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let (queue, _) = queue();
        let id = JobId::new();

        assert!(matches!(queue.get(id).await, Err(JobError::NotFound(got)) if got == id));
    }
}
