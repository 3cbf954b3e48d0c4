use chrono::{DateTime, Duration, Utc};
use common::JobId;
use serde::{Deserialize, Serialize};

use crate::{JobError, Result};

/// The kind of transactional notification a job delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    OrderConfirmation,
    OrderShipped,
    PasswordReset,
    Welcome,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::OrderConfirmation => "order_confirmation",
            JobKind::OrderShipped => "order_shipped",
            JobKind::PasswordReset => "password_reset",
            JobKind::Welcome => "welcome",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "order_confirmation" => Ok(JobKind::OrderConfirmation),
            "order_shipped" => Ok(JobKind::OrderShipped),
            "password_reset" => Ok(JobKind::PasswordReset),
            "welcome" => Ok(JobKind::Welcome),
            other => Err(JobError::Decode(format!("unknown job kind '{other}'"))),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of a job in its lifecycle.
///
/// State transitions:
/// ```text
/// Waiting ──► Active ──┬──► Completed
///    ▲                 ├──► Delayed ──► Active ...
///    │                 └──► Failed
/// Delayed (enqueued with a delay)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobStatus {
    /// Returns true for states that are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true for states a worker may claim from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Waiting | JobStatus::Delayed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "delayed" => Ok(JobStatus::Delayed),
            other => Err(JobError::Decode(format!("unknown job status '{other}'"))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of asynchronous notification work with its retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Opaque data handed to the transport.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Deliveries started so far, counted at claim time.
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest instant a worker may claim the job.
    pub run_at: DateTime<Utc>,
    /// Set while the job is active; drives the visibility timeout.
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the last delivery attempt finished.
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Job {
    /// Builds a new job. A positive `delay` makes it `Delayed` until `now + delay`.
    ///
    /// Fails with `InvalidDelay` when `now + delay` is not a representable
    /// timestamp.
    pub fn new(
        kind: JobKind,
        payload: serde_json::Value,
        max_attempts: u32,
        now: DateTime<Utc>,
        delay: Option<Duration>,
    ) -> Result<Self> {
        let (status, run_at) = match delay {
            Some(delay) if delay > Duration::zero() => {
                let run_at = now.checked_add_signed(delay).ok_or(JobError::InvalidDelay {
                    seconds: delay.num_seconds(),
                })?;
                (JobStatus::Delayed, run_at)
            }
            _ => (JobStatus::Waiting, now),
        };
        Ok(Self {
            id: JobId::new(),
            kind,
            payload,
            status,
            attempts: 0,
            max_attempts,
            created_at: now,
            run_at,
            claimed_at: None,
            processed_at: None,
            last_error: None,
        })
    }

    /// True if a worker may claim the job at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.run_at <= now && self.attempts < self.max_attempts
    }

    /// True if another delivery may follow a failure of the current attempt.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Options for [`JobQueue::enqueue_with`](crate::JobQueue::enqueue_with).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds the job back for `delay` before it becomes claimable.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Overrides the queue's default attempt ceiling for this job.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }

    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Waiting => self.waiting += count,
            JobStatus::Active => self.active += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Delayed => self.delayed += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_without_delay_is_waiting() {
        let now = Utc::now();
        let job = Job::new(JobKind::Welcome, serde_json::json!({}), 3, now, None).unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.run_at, now);
        assert_eq!(job.attempts, 0);
        assert!(job.is_due(now));
    }

    #[test]
    fn new_job_with_delay_is_delayed_until_run_at() {
        let now = Utc::now();
        let job = Job::new(
            JobKind::OrderShipped,
            serde_json::json!({}),
            3,
            now,
            Some(Duration::minutes(5)),
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Delayed);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + Duration::minutes(5)));
    }

    #[test]
    fn zero_delay_is_waiting() {
        let now = Utc::now();
        let job = Job::new(
            JobKind::Welcome,
            serde_json::json!({}),
            3,
            now,
            Some(Duration::zero()),
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
    }

    #[test]
    fn delay_past_the_timestamp_range_is_rejected() {
        let result = Job::new(
            JobKind::Welcome,
            serde_json::json!({}),
            3,
            Utc::now(),
            Some(Duration::seconds(1_000_000_000_000_000)),
        );
        assert!(matches!(
            result,
            Err(JobError::InvalidDelay {
                seconds: 1_000_000_000_000_000
            })
        ));
    }

    #[test]
    fn terminal_and_claimable_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Delayed.is_terminal());
        assert!(JobStatus::Waiting.is_claimable());
        assert!(JobStatus::Delayed.is_claimable());
        assert!(!JobStatus::Active.is_claimable());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&JobKind::OrderConfirmation).unwrap();
        assert_eq!(json, "\"order_confirmation\"");
        assert_eq!(
            JobKind::parse("password_reset").unwrap(),
            JobKind::PasswordReset
        );
        assert!(JobKind::parse("sms").is_err());
    }

    #[test]
    fn stats_total() {
        let mut stats = QueueStats::default();
        stats.add(JobStatus::Waiting, 2);
        stats.add(JobStatus::Failed, 1);
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.waiting, 2);
    }
}
