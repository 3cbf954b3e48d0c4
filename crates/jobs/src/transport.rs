//! Email transport trait and the implementations shipped with the queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::JobId;

use crate::{DeliveryError, Job};

/// Delivers the message described by a job.
///
/// An `Err` is recorded on the job and retried by the worker; it is never
/// returned to whoever enqueued the job.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: EmailTransport + ?Sized> EmailTransport for Arc<T> {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        (**self).deliver(job).await
    }
}

/// Transport that only logs what it would send.
///
/// Used by the server when no mail provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempts,
            payload = %job.payload,
            "email delivered"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryTransportState {
    delivered: Vec<JobId>,
    attempts: usize,
    fail_next: usize,
    fail_always: bool,
    latency: Option<Duration>,
}

/// In-memory transport for testing. Records deliveries and fails on demand.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<InMemoryTransportState>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryTransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` deliveries fail.
    pub fn fail_next(&self, count: usize) {
        self.state().fail_next = count;
    }

    /// Makes every delivery fail until reset.
    pub fn set_fail_always(&self, fail: bool) {
        self.state().fail_always = fail;
    }

    /// Sleeps this long inside every delivery.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Jobs delivered successfully, in delivery order.
    pub fn delivered(&self) -> Vec<JobId> {
        self.state().delivered.clone()
    }

    /// Delivery attempts, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.state().attempts
    }
}

#[async_trait]
impl EmailTransport for InMemoryTransport {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        state.attempts += 1;
        if state.fail_always {
            return Err(DeliveryError::Unavailable("smtp relay down".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(DeliveryError::Unavailable("connection reset".to_string()));
        }
        state.delivered.push(job.id);
        Ok(())
    }
}
