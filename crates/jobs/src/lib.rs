//! Notification job queue.
//!
//! Producers call [`JobQueue::enqueue`]; one or more [`JobWorker`]s claim due
//! jobs, hand them to an [`EmailTransport`], and record success, a delayed
//! retry, or terminal failure. Operators can pause claiming, inspect counts,
//! and clean out old finished jobs.

pub mod backoff;
pub mod error;
pub mod job;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod store;
pub mod transport;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use common::JobId;
pub use error::{DeliveryError, JobError, Result};
pub use job::{EnqueueOptions, Job, JobKind, JobStatus, QueueStats};
pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;
pub use queue::{DEFAULT_MAX_ATTEMPTS, JobQueue};
pub use store::{JobStore, RequeueOutcome};
pub use transport::{EmailTransport, InMemoryTransport, LogTransport};
pub use worker::{JobOutcome, JobWorker, RunSummary, WorkerConfig};
