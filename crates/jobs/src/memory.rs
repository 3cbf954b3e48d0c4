use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::JobId;
use tokio::sync::RwLock;

use crate::store::{JobStore, RequeueOutcome};
use crate::{Job, JobError, JobStatus, QueueStats, Result};

const VISIBILITY_TIMEOUT_ERROR: &str = "visibility timeout expired";

#[derive(Debug, Default)]
struct State {
    /// Jobs keyed by id, tagged with an insertion sequence for stable ordering.
    jobs: HashMap<JobId, (u64, Job)>,
    next_seq: u64,
}

impl State {
    /// The job, if it is still active under claim `attempt`.
    fn claimed_mut(&mut self, id: JobId, attempt: u32) -> Result<&mut Job> {
        let (_, job) = self.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status != JobStatus::Active {
            return Err(JobError::InvalidState {
                id,
                expected: JobStatus::Active,
                actual: job.status,
            });
        }
        if job.attempts != attempt {
            return Err(JobError::StaleClaim {
                id,
                attempt,
                current: job.attempts,
            });
        }
        Ok(job)
    }
}

/// In-memory job store for tests and single-process runs.
///
/// Claims run under the store's write lock, so concurrent workers in one
/// process never receive the same job.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryJobStore {
    /// Creates a new empty job store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs in any state.
    pub async fn job_count(&self) -> usize {
        self.state.read().await.jobs.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        let mut state = self.state.write().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(job.id, (seq, job.clone()));
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self
            .state
            .read()
            .await
            .jobs
            .get(&id)
            .map(|(_, job)| job.clone()))
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<&(u64, Job)> = state
            .jobs
            .values()
            .filter(|(_, job)| status.is_none_or(|s| job.status == s))
            .collect();
        jobs.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        Ok(jobs
            .into_iter()
            .take(limit)
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut state = self.state.write().await;

        let next = state
            .jobs
            .values()
            .filter(|(_, job)| job.is_due(now))
            .min_by(|(seq_a, a), (seq_b, b)| {
                a.run_at
                    .cmp(&b.run_at)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(seq_a.cmp(seq_b))
            })
            .map(|(_, job)| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some((_, job)) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Active;
        job.claimed_at = Some(now);
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: JobId, attempt: u32, at: DateTime<Utc>) -> Result<Job> {
        let mut state = self.state.write().await;
        let job = state.claimed_mut(id, attempt)?;
        job.status = JobStatus::Completed;
        job.claimed_at = None;
        job.processed_at = Some(at);
        job.last_error = None;
        Ok(job.clone())
    }

    async fn fail(
        &self,
        id: JobId,
        attempt: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Job> {
        let mut state = self.state.write().await;
        let job = state.claimed_mut(id, attempt)?;
        match retry_at {
            Some(retry_at) if job.has_attempts_left() => {
                job.status = JobStatus::Delayed;
                job.run_at = retry_at;
            }
            _ => job.status = JobStatus::Failed,
        }
        job.claimed_at = None;
        job.processed_at = Some(at);
        job.last_error = Some(error.to_string());
        Ok(job.clone())
    }

    async fn requeue_stuck(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RequeueOutcome> {
        let mut state = self.state.write().await;
        let mut outcome = RequeueOutcome::default();

        for (_, job) in state.jobs.values_mut() {
            let stuck = job.status == JobStatus::Active
                && job.claimed_at.is_some_and(|claimed| claimed <= claimed_before);
            if !stuck {
                continue;
            }
            if job.has_attempts_left() {
                job.status = JobStatus::Delayed;
                job.run_at = now;
                outcome.requeued += 1;
            } else {
                job.status = JobStatus::Failed;
                job.processed_at = Some(now);
                outcome.failed += 1;
            }
            job.claimed_at = None;
            job.last_error = Some(VISIBILITY_TIMEOUT_ERROR.to_string());
        }

        Ok(outcome)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, (_, job)| {
            !(job.status.is_terminal() && job.processed_at.is_some_and(|at| at <= cutoff))
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn counts(&self) -> Result<QueueStats> {
        let state = self.state.read().await;
        let mut stats = QueueStats::default();
        for (_, job) in state.jobs.values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::JobKind;

    fn job(now: DateTime<Utc>, max_attempts: u32) -> Job {
        Job::new(
            JobKind::OrderConfirmation,
            serde_json::json!({"order_id": "o-1"}),
            max_attempts,
            now,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn claim_increments_attempts_and_marks_active() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let inserted = store.insert(job(now, 3)).await.unwrap();

        let claimed = store.claim_next(now).await.unwrap().unwrap();

        assert_eq!(claimed.id, inserted.id);
        assert_eq!(claimed.status, JobStatus::Active);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.claimed_at, Some(now));
        assert!(store.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_takes_earliest_run_at_first() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let later = store.insert(job(now, 3)).await.unwrap();
        let earlier = store
            .insert(job(now - Duration::seconds(5), 3))
            .await
            .unwrap();

        let first = store.claim_next(now).await.unwrap().unwrap();
        let second = store.claim_next(now).await.unwrap().unwrap();

        assert_eq!(first.id, earlier.id);
        assert_eq!(second.id, later.id);
    }

    #[tokio::test]
    async fn delayed_job_is_not_claimed_before_run_at() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        store
            .insert(
                Job::new(
                    JobKind::Welcome,
                    serde_json::json!({}),
                    3,
                    now,
                    Some(Duration::seconds(30)),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert!(store.claim_next(now).await.unwrap().is_none());
        assert!(
            store
                .claim_next(now + Duration::seconds(30))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn complete_requires_active() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let inserted = store.insert(job(now, 3)).await.unwrap();

        let result = store.complete(inserted.id, 1, now).await;

        assert!(matches!(
            result,
            Err(JobError::InvalidState {
                actual: JobStatus::Waiting,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn requeue_stuck_respects_attempt_ceiling() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        store.insert(job(now, 1)).await.unwrap();
        store.insert(job(now, 3)).await.unwrap();
        store.claim_next(now).await.unwrap().unwrap();
        store.claim_next(now).await.unwrap().unwrap();

        let outcome = store
            .requeue_stuck(now, now + Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RequeueOutcome {
                requeued: 1,
                failed: 1
            }
        );
        let stats = store.counts().await.unwrap();
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn delete_terminal_before_keeps_recent_and_pending() {
        let store = InMemoryJobStore::new();
        let t0 = Utc::now();
        let old = store.insert(job(t0, 3)).await.unwrap();
        store.claim_next(t0).await.unwrap();
        store.complete(old.id, 1, t0).await.unwrap();
        store.insert(job(t0, 3)).await.unwrap();

        let deleted = store
            .delete_terminal_before(t0 + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.job_count().await, 1);
        assert!(store.get(old.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn superseded_claim_cannot_record_a_result() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let inserted = store.insert(job(now, 2)).await.unwrap();
        let first = store.claim_next(now).await.unwrap().unwrap();
        store
            .requeue_stuck(now, now + Duration::minutes(6))
            .await
            .unwrap();
        let second = store
            .claim_next(now + Duration::minutes(6))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.attempts, 2);

        let late = store
            .fail(inserted.id, first.attempts, "timeout", Some(now), now)
            .await;
        assert!(matches!(
            late,
            Err(JobError::StaleClaim {
                attempt: 1,
                current: 2,
                ..
            })
        ));

        let done = store
            .complete(inserted.id, second.attempts, now + Duration::minutes(7))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn fail_on_last_attempt_is_terminal_even_with_retry_at() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let inserted = store.insert(job(now, 1)).await.unwrap();
        store.claim_next(now).await.unwrap().unwrap();

        let failed = store
            .fail(inserted.id, 1, "rejected", Some(now + Duration::seconds(1)), now)
            .await
            .unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn delete_terminal_before_includes_cutoff_instant() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let inserted = store.insert(job(now, 3)).await.unwrap();
        store.claim_next(now).await.unwrap();
        store.complete(inserted.id, 1, now).await.unwrap();

        assert_eq!(store.delete_terminal_before(now).await.unwrap(), 1);
        assert_eq!(store.job_count().await, 0);
    }
}
