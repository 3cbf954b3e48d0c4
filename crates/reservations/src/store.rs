use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OwnerRef, ReservationId, SubjectRef};

use crate::{ReleaseReason, Reservation, Result, StockLevel};

/// Core trait for reservation storage.
///
/// A store owns both the reservation rows and the stock ledger they hold
/// against, so that the availability check and the ledger decrement can share
/// a transaction. All implementations must be thread-safe (Send + Sync).
///
/// Timestamps are supplied by the caller; stores never read the clock.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Sets the ledger quantity for a subject, creating the row if needed.
    async fn set_stock(&self, subject: &SubjectRef, quantity: u32, at: DateTime<Utc>)
    -> Result<()>;

    /// Returns the stock position of a subject, or None if it has no ledger row.
    async fn stock_level(&self, subject: &SubjectRef) -> Result<Option<StockLevel>>;

    /// Inserts an active reservation if enough stock is available.
    ///
    /// The availability read and the insert are atomic with respect to every
    /// other `try_reserve` and `commit` on the same subject. Fails with
    /// `InsufficientStock` otherwise; a subject without a ledger row has no
    /// available stock.
    async fn try_reserve(&self, reservation: Reservation) -> Result<Reservation>;

    /// Moves an active reservation to committed and decrements the ledger by
    /// its quantity, in one transaction.
    async fn commit(&self, id: ReservationId, at: DateTime<Utc>) -> Result<Reservation>;

    /// Moves an active reservation to the terminal status matching `reason`.
    /// The ledger is not touched.
    async fn release(
        &self,
        id: ReservationId,
        reason: ReleaseReason,
        at: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Retrieves a reservation by id.
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Lists active reservations, most recent first.
    async fn list_active(&self) -> Result<Vec<Reservation>>;

    /// Lists active reservations held by one owner, most recent first.
    async fn list_active_for_owner(&self, owner: &OwnerRef) -> Result<Vec<Reservation>>;

    /// Returns the ids of active reservations with `expires_at <= now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>>;
}
