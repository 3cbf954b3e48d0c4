//! Reservation manager: the single entry point for stock holds.

use std::sync::Arc;

use chrono::Duration;
use common::{Clock, OwnerRef, ReservationId, SubjectRef, SystemClock};

use crate::store::ReservationStore;
use crate::{ReleaseReason, Reservation, ReservationError, Result, StockLevel};

/// Creates, commits, and releases time-boxed holds against the stock ledger.
///
/// Holds are soft: an active reservation only lowers the *computed*
/// availability. The ledger itself is written once per reservation, by
/// [`commit`](Self::commit).
#[derive(Clone)]
pub struct ReservationManager<S: ReservationStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: ReservationStore> ReservationManager<S> {
    /// Creates a manager using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Creates a manager reading time from `clock`.
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the clock used for expiry decisions.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Places a hold of `quantity` units of `subject` for `owner`, valid for `ttl`.
    ///
    /// Fails fast with `InsufficientStock` rather than waiting for stock to
    /// free up.
    #[tracing::instrument(skip(self, subject, owner), fields(subject = %subject, owner = %owner))]
    pub async fn reserve(
        &self,
        subject: SubjectRef,
        quantity: u32,
        owner: OwnerRef,
        ttl: Duration,
    ) -> Result<Reservation> {
        if quantity == 0 {
            return Err(ReservationError::InvalidQuantity);
        }
        if ttl <= Duration::zero() {
            return Err(ReservationError::InvalidTtl {
                seconds: ttl.num_seconds(),
            });
        }

        let reservation = Reservation::new(subject, quantity, owner, self.clock.now(), ttl)?;
        match self.store.try_reserve(reservation).await {
            Ok(reservation) => {
                metrics::counter!("reservations_created_total").increment(1);
                tracing::info!(
                    reservation_id = %reservation.id,
                    quantity,
                    expires_at = %reservation.expires_at,
                    "reservation created"
                );
                Ok(reservation)
            }
            Err(e @ ReservationError::InsufficientStock { .. }) => {
                metrics::counter!("reservations_rejected_total").increment(1);
                tracing::info!(quantity, error = %e, "reservation rejected");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Permanently applies an active reservation to the ledger.
    ///
    /// Calling it twice is an error (`InvalidState`), never a silent no-op.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, id: ReservationId) -> Result<Reservation> {
        let result = self.store.commit(id, self.clock.now()).await;
        match &result {
            Ok(reservation) => {
                metrics::counter!("reservations_committed_total").increment(1);
                tracing::info!(
                    subject = %reservation.subject_ref,
                    quantity = reservation.quantity,
                    "reservation committed"
                );
            }
            Err(e @ ReservationError::InvalidState { .. }) => {
                tracing::error!(error = %e, "commit attempted on non-active reservation");
            }
            Err(_) => {}
        }
        result
    }

    /// Releases an active reservation without touching the ledger.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: ReservationId, reason: ReleaseReason) -> Result<Reservation> {
        let result = self.store.release(id, reason, self.clock.now()).await;
        match &result {
            Ok(_) => {
                metrics::counter!("reservations_released_total", "reason" => reason_label(reason))
                    .increment(1);
                tracing::info!(?reason, "reservation released");
            }
            // Losing a race against commit is expected for the sweeper.
            Err(e @ ReservationError::InvalidState { .. }) if reason == ReleaseReason::Expired => {
                tracing::debug!(error = %e, "reservation already terminal");
            }
            Err(e @ ReservationError::InvalidState { .. }) => {
                tracing::error!(error = %e, "release attempted on non-active reservation");
            }
            Err(_) => {}
        }
        result
    }

    /// Cancels every active hold belonging to `owner`.
    ///
    /// Holds that turn terminal concurrently are skipped. Returns the number
    /// actually released.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn release_for_owner(
        &self,
        owner: &OwnerRef,
        reason: ReleaseReason,
    ) -> Result<usize> {
        let mut released = 0;
        for reservation in self.store.list_active_for_owner(owner).await? {
            match self.release(reservation.id, reason).await {
                Ok(_) => released += 1,
                Err(ReservationError::InvalidState { .. } | ReservationError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(released)
    }

    /// Retrieves a reservation by id.
    pub async fn get(&self, id: ReservationId) -> Result<Reservation> {
        self.store
            .get(id)
            .await?
            .ok_or(ReservationError::NotFound(id))
    }

    /// Lists active reservations, most recent first.
    pub async fn list_active(&self) -> Result<Vec<Reservation>> {
        self.store.list_active().await
    }

    /// Lists the active holds of one owner.
    pub async fn list_active_for_owner(&self, owner: &OwnerRef) -> Result<Vec<Reservation>> {
        self.store.list_active_for_owner(owner).await
    }

    /// Returns the stock position of a subject.
    pub async fn stock_level(&self, subject: &SubjectRef) -> Result<Option<StockLevel>> {
        self.store.stock_level(subject).await
    }

    /// Sets the ledger quantity of a subject.
    #[tracing::instrument(skip(self, subject), fields(subject = %subject))]
    pub async fn set_stock(&self, subject: &SubjectRef, quantity: u32) -> Result<()> {
        self.store
            .set_stock(subject, quantity, self.clock.now())
            .await?;
        tracing::info!(quantity, "stock level set");
        Ok(())
    }
}

fn reason_label(reason: ReleaseReason) -> &'static str {
    match reason {
        ReleaseReason::Cancelled => "cancelled",
        ReleaseReason::Expired => "expired",
    }
}
