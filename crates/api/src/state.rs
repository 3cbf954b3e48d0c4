//! Shared application state and background task wiring.

use std::sync::Arc;

use chrono::Utc;
use jobs::{BackoffPolicy, JobQueue, JobStore, JobWorker, LogTransport, WorkerConfig};
use reservations::{ReservationManager, ReservationStore, ReservationSweeper};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError};

/// Shared application state accessible from all handlers.
pub struct AppState<R: ReservationStore, J: JobStore> {
    pub reservations: Arc<ReservationManager<R>>,
    pub sweeper: ReservationSweeper<R>,
    pub queue: JobQueue<J>,
    /// Hold lifetime used when a request does not ask for one.
    pub reservation_ttl: chrono::Duration,
}

impl<R: ReservationStore + 'static, J: JobStore + 'static> AppState<R, J> {
    /// Builds state around already-constructed services.
    pub fn new(
        reservations: ReservationManager<R>,
        queue: JobQueue<J>,
        reservation_ttl: chrono::Duration,
    ) -> Self {
        let reservations = Arc::new(reservations);
        Self {
            sweeper: ReservationSweeper::new(Arc::clone(&reservations)),
            reservations,
            queue,
            reservation_ttl,
        }
    }

    /// Builds state from stores and configuration, using the system clock.
    ///
    /// Fails when the default hold lifetime cannot produce an expiry
    /// timestamp, rather than rejecting every later reserve.
    pub fn from_config(
        reservation_store: R,
        job_store: J,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let reservation_ttl = to_chrono("RESERVATION_TTL_SECS", config.reservation_ttl)?;
        if Utc::now().checked_add_signed(reservation_ttl).is_none() {
            return Err(ConfigError::DurationOutOfRange {
                name: "RESERVATION_TTL_SECS",
                seconds: config.reservation_ttl.as_secs(),
            });
        }
        to_chrono("JOB_VISIBILITY_TIMEOUT_SECS", config.job_visibility_timeout)?;
        to_chrono("JOB_BACKOFF_INITIAL_MS", config.job_backoff_initial)?;

        let queue = JobQueue::new(job_store).with_max_attempts(config.job_max_attempts)?;
        Ok(Self::new(
            ReservationManager::new(reservation_store),
            queue,
            reservation_ttl,
        ))
    }

    /// Starts the expiry sweeper and one email worker.
    ///
    /// Both stop once `shutdown` carries `true`.
    pub fn spawn_background_tasks(
        &self,
        config: &Config,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let defaults = WorkerConfig::default();
        // Both were range-checked by `from_config`.
        let worker_config = WorkerConfig {
            poll_interval: config.worker_poll_interval,
            visibility_timeout: chrono::Duration::from_std(config.job_visibility_timeout)
                .unwrap_or(defaults.visibility_timeout),
            backoff: BackoffPolicy {
                initial_delay: chrono::Duration::from_std(config.job_backoff_initial)
                    .unwrap_or(defaults.backoff.initial_delay),
                ..defaults.backoff
            },
        };
        let worker = JobWorker::new(self.queue.clone(), LogTransport, worker_config);

        vec![
            self.sweeper
                .clone()
                .spawn(config.sweep_interval, shutdown.clone()),
            worker.spawn(shutdown),
        ]
    }
}

fn to_chrono(
    name: &'static str,
    duration: std::time::Duration,
) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::from_std(duration).map_err(|_| ConfigError::DurationOutOfRange {
        name,
        seconds: duration.as_secs(),
    })
}
