//! Consumer side of the job queue.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::backoff::BackoffPolicy;
use crate::store::{JobStore, RequeueOutcome};
use crate::transport::EmailTransport;
use crate::{Job, JobError, JobQueue, JobStatus, Result};

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Longest idle wait between polls when no enqueue wakes the worker.
    pub poll_interval: std::time::Duration,
    /// How long a job may stay active before it is presumed lost.
    pub visibility_timeout: chrono::Duration,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(1),
            visibility_timeout: chrono::Duration::minutes(5),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Delivery failed and the job is delayed until `retry_at`.
    Retrying { retry_at: DateTime<Utc> },
    /// Delivery failed on the last allowed attempt.
    Failed,
    /// The claim was superseded while the job was being delivered, so the
    /// result was discarded. Happens when the visibility timeout requeued it
    /// first, whether or not another worker has claimed it since.
    Lost,
}

/// Tally of a [`JobWorker::run_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub lost: usize,
    /// Jobs whose outcome could not be recorded.
    pub errors: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Retrying { .. } => self.retried += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Lost => self.lost += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.retried + self.failed + self.lost + self.errors
    }
}

/// Claims jobs from a [`JobQueue`] and hands them to an [`EmailTransport`].
///
/// Any number of workers may share one queue; the store's claim guarantees
/// each job goes to one of them at a time.
pub struct JobWorker<S: JobStore, T: EmailTransport> {
    queue: JobQueue<S>,
    transport: Arc<T>,
    config: WorkerConfig,
}

impl<S: JobStore, T: EmailTransport> Clone for JobWorker<S, T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

impl<S: JobStore + 'static, T: EmailTransport + 'static> JobWorker<S, T> {
    pub fn new(queue: JobQueue<S>, transport: T, config: WorkerConfig) -> Self {
        Self {
            queue,
            transport: Arc::new(transport),
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claims the next due job, unless the queue is paused.
    pub async fn claim(&self) -> Result<Option<Job>> {
        if self.queue.is_paused() {
            return Ok(None);
        }
        self.queue.store().claim_next(self.queue.clock().now()).await
    }

    /// Delivers a claimed job and records the result.
    #[tracing::instrument(
        skip(self, job),
        fields(job_id = %job.id, kind = %job.kind, attempt = job.attempts)
    )]
    pub async fn process(&self, job: Job) -> Result<JobOutcome> {
        let started = Instant::now();
        let delivery = self.transport.deliver(&job).await;
        metrics::histogram!("job_delivery_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let store = self.queue.store();
        let now = self.queue.clock().now();

        let recorded = match delivery {
            Ok(()) => store.complete(job.id, job.attempts, now).await.map(|_| {
                metrics::counter!("jobs_completed_total").increment(1);
                tracing::info!("job completed");
                JobOutcome::Completed
            }),
            Err(e) => {
                let error = e.to_string();
                let delay = self.config.backoff.delay_for_attempt(job.attempts);
                let retry_at = job
                    .has_attempts_left()
                    .then(|| now.checked_add_signed(delay))
                    .flatten();
                store
                    .fail(job.id, job.attempts, &error, retry_at, now)
                    .await
                    .map(|stored| match stored.status {
                        JobStatus::Delayed => {
                            metrics::counter!("jobs_retried_total").increment(1);
                            tracing::warn!(
                                %error,
                                retry_at = %stored.run_at,
                                "delivery failed, retry scheduled"
                            );
                            JobOutcome::Retrying {
                                retry_at: stored.run_at,
                            }
                        }
                        _ => {
                            metrics::counter!("jobs_failed_total").increment(1);
                            tracing::error!(%error, "delivery failed, attempts exhausted");
                            JobOutcome::Failed
                        }
                    })
            }
        };

        match recorded {
            Err(
                e @ (JobError::InvalidState { .. }
                | JobError::StaleClaim { .. }
                | JobError::NotFound(_)),
            ) => {
                tracing::warn!(error = %e, "claim lost during delivery, result discarded");
                Ok(JobOutcome::Lost)
            }
            other => other,
        }
    }

    /// Claims and processes a single job. `None` when nothing is due.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>> {
        match self.claim().await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Processes jobs until none is due.
    ///
    /// A job whose outcome cannot be recorded is logged and counted; only a
    /// failing claim ends the pass early.
    pub async fn run_pending(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        while let Some(job) = self.claim().await? {
            let job_id = job.id;
            match self.process(job).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::warn!(%job_id, error = %e, "failed to record job outcome");
                    summary.errors += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Returns jobs stuck in `Active` past the visibility timeout to the queue.
    pub async fn requeue_stuck(&self) -> Result<RequeueOutcome> {
        let now = self.queue.clock().now();
        // A timeout reaching before the earliest timestamp can never elapse.
        let Some(claimed_before) = now.checked_sub_signed(self.config.visibility_timeout) else {
            return Ok(RequeueOutcome::default());
        };
        let outcome = self
            .queue
            .store()
            .requeue_stuck(claimed_before, now)
            .await?;

        if outcome.requeued > 0 || outcome.failed > 0 {
            metrics::counter!("jobs_retried_total").increment(outcome.requeued);
            metrics::counter!("jobs_failed_total").increment(outcome.failed);
            tracing::warn!(
                requeued = outcome.requeued,
                failed = outcome.failed,
                "stuck jobs recovered after visibility timeout"
            );
        }
        Ok(outcome)
    }

    /// Works the queue until `shutdown` turns true or its sender drops.
    ///
    /// Each round recovers stuck jobs, drains everything due, then sleeps
    /// until an enqueue wakes it or the poll interval passes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let notify = Arc::clone(self.queue.notifier());
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "job worker started"
        );

        loop {
            if let Err(e) = self.requeue_stuck().await {
                tracing::error!(error = %e, "visibility timeout scan failed");
            }
            match self.run_pending().await {
                Ok(summary) if summary.processed() > 0 => {
                    tracing::debug!(?summary, "worker pass finished");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "worker pass failed"),
            }

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("job worker stopped");
    }

    /// Spawns [`run`](Self::run) on the tokio runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
