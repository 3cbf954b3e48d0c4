//! Periodic release of reservations that outlived their TTL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::store::ReservationStore;
use crate::{ReleaseReason, ReservationError, ReservationManager, Result};

/// Finds active reservations past `expires_at` and releases them as expired.
///
/// Each release goes through [`ReservationManager::release`], whose
/// `status = active` guard is shared with `commit`; a reservation committed
/// while the sweep is running is skipped, not expired.
pub struct ReservationSweeper<S: ReservationStore> {
    manager: Arc<ReservationManager<S>>,
}

impl<S: ReservationStore> Clone for ReservationSweeper<S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<S: ReservationStore + 'static> ReservationSweeper<S> {
    pub fn new(manager: Arc<ReservationManager<S>>) -> Self {
        Self { manager }
    }

    /// Sweeps using the manager's clock. Returns the number of reservations expired.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.manager.clock().now();
        self.sweep_expired_at(now).await
    }

    /// Sweeps every active reservation with `expires_at <= now`.
    ///
    /// A failure on one reservation is logged and skipped; only a failure to
    /// list candidates aborts the run.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = self.manager.store().find_expired(now).await?;
        let mut expired = 0;

        for id in candidates {
            match self.manager.release(id, ReleaseReason::Expired).await {
                Ok(_) => expired += 1,
                Err(ReservationError::InvalidState { .. } | ReservationError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        reservation_id = %id,
                        error = %e,
                        "failed to expire reservation"
                    );
                }
            }
        }

        metrics::counter!("reservations_swept_total").increment(expired as u64);
        if expired > 0 {
            tracing::info!(expired, "expired reservations swept");
        }
        Ok(expired)
    }

    /// Sweeps every `interval` until `shutdown` turns true or its sender drops.
    pub async fn run(self, interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "reservation sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_expired().await {
                        tracing::error!(error = %e, "reservation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("reservation sweeper stopped");
    }

    /// Spawns [`run`](Self::run) on the tokio runtime.
    pub fn spawn(
        self,
        interval: std::time::Duration,
        shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(interval, shutdown))
    }
}
