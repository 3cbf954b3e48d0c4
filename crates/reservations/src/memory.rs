use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OwnerRef, ReservationId, SubjectRef};
use tokio::sync::RwLock;

use crate::{
    ReleaseReason, Reservation, ReservationError, ReservationStatus, Result, StockLevel,
    store::ReservationStore,
};

#[derive(Debug, Default)]
struct State {
    ledger: HashMap<SubjectRef, u32>,
    /// Reservations keyed by id, tagged with an insertion sequence so that
    /// listings stay deterministic when timestamps tie.
    reservations: HashMap<ReservationId, (u64, Reservation)>,
    next_seq: u64,
}

impl State {
    fn reserved(&self, subject: &SubjectRef) -> u32 {
        self.reservations
            .values()
            .filter(|(_, r)| r.is_active() && &r.subject_ref == subject)
            .map(|(_, r)| r.quantity)
            .sum()
    }

    fn active_sorted<'a>(&'a self, filter: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut active: Vec<&'a (u64, Reservation)> = self
            .reservations
            .values()
            .filter(|(_, r)| r.is_active() && filter(r))
            .collect();
        active.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        active.into_iter().map(|(_, r)| r.clone()).collect()
    }

    fn active_mut(&mut self, id: ReservationId) -> Result<&mut Reservation> {
        let (_, reservation) = self
            .reservations
            .get_mut(&id)
            .ok_or(ReservationError::NotFound(id))?;
        reservation.ensure_active()?;
        Ok(reservation)
    }
}

/// In-memory reservation store for tests and single-process runs.
///
/// Every mutation runs under one write lock, which serializes the
/// availability check with the insert for all subjects at once.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryReservationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of reservations in any state.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn set_stock(
        &self,
        subject: &SubjectRef,
        quantity: u32,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .ledger
            .insert(subject.clone(), quantity);
        Ok(())
    }

    async fn stock_level(&self, subject: &SubjectRef) -> Result<Option<StockLevel>> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .get(subject)
            .map(|on_hand| StockLevel::new(*on_hand, state.reserved(subject))))
    }

    async fn try_reserve(&self, reservation: Reservation) -> Result<Reservation> {
        let mut state = self.state.write().await;

        let on_hand = state
            .ledger
            .get(&reservation.subject_ref)
            .copied()
            .unwrap_or(0);
        let available = on_hand.saturating_sub(state.reserved(&reservation.subject_ref));

        if available < reservation.quantity {
            return Err(ReservationError::InsufficientStock {
                subject: reservation.subject_ref,
                requested: reservation.quantity,
                available,
            });
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .reservations
            .insert(reservation.id, (seq, reservation.clone()));

        Ok(reservation)
    }

    async fn commit(&self, id: ReservationId, at: DateTime<Utc>) -> Result<Reservation> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let (subject, quantity) = {
            let reservation = state.active_mut(id)?;
            (reservation.subject_ref.clone(), reservation.quantity)
        };

        let on_hand = state.ledger.get(&subject).copied().unwrap_or(0);
        if on_hand < quantity {
            return Err(ReservationError::InsufficientStock {
                subject,
                requested: quantity,
                available: on_hand,
            });
        }
        state.ledger.insert(subject, on_hand - quantity);

        let reservation = state.active_mut(id)?;
        reservation.status = ReservationStatus::Committed;
        reservation.released_at = Some(at);
        Ok(reservation.clone())
    }

    async fn release(
        &self,
        id: ReservationId,
        reason: ReleaseReason,
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut state = self.state.write().await;
        let reservation = state.active_mut(id)?;
        reservation.status = reason.into();
        reservation.released_at = Some(at);
        Ok(reservation.clone())
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self
            .state
            .read()
            .await
            .reservations
            .get(&id)
            .map(|(_, r)| r.clone()))
    }

    async fn list_active(&self) -> Result<Vec<Reservation>> {
        Ok(self.state.read().await.active_sorted(|_| true))
    }

    async fn list_active_for_owner(&self, owner: &OwnerRef) -> Result<Vec<Reservation>> {
        Ok(self
            .state
            .read()
            .await
            .active_sorted(|r| &r.owner_ref == owner))
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>> {
        let state = self.state.read().await;
        let mut expired: Vec<&Reservation> = state
            .reservations
            .values()
            .map(|(_, r)| r)
            .filter(|r| r.is_expired_at(now))
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        Ok(expired.into_iter().map(|r| r.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn hold(subject: &str, quantity: u32, owner: &str, now: DateTime<Utc>) -> Reservation {
        Reservation::new(
            SubjectRef::new(subject),
            quantity,
            OwnerRef::new(owner),
            now,
            Duration::minutes(10),
        )
        .unwrap()
    }

    async fn store_with_stock(subject: &str, quantity: u32) -> InMemoryReservationStore {
        let store = InMemoryReservationStore::new();
        store
            .set_stock(&SubjectRef::new(subject), quantity, Utc::now())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn reserve_within_stock() {
        let store = store_with_stock("SKU-1", 5).await;
        let now = Utc::now();

        store.try_reserve(hold("SKU-1", 3, "o1", now)).await.unwrap();

        let level = store
            .stock_level(&SubjectRef::new("SKU-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level, StockLevel::new(5, 3));
    }

    #[tokio::test]
    async fn reserve_rejects_when_holds_exhaust_stock() {
        let store = store_with_stock("SKU-1", 4).await;
        let now = Utc::now();
        store.try_reserve(hold("SKU-1", 3, "o1", now)).await.unwrap();

        let result = store.try_reserve(hold("SKU-1", 2, "o2", now)).await;

        assert!(matches!(
            result,
            Err(ReservationError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn reserve_unknown_subject_has_no_stock() {
        let store = InMemoryReservationStore::new();
        let result = store.try_reserve(hold("ghost", 1, "o1", Utc::now())).await;
        assert!(matches!(
            result,
            Err(ReservationError::InsufficientStock { available: 0, .. })
        ));
    }

    #[tokio::test]
    async fn commit_decrements_ledger_once() {
        let store = store_with_stock("SKU-1", 5).await;
        let r = store
            .try_reserve(hold("SKU-1", 2, "o1", Utc::now()))
            .await
            .unwrap();

        let committed = store.commit(r.id, Utc::now()).await.unwrap();
        assert_eq!(committed.status, ReservationStatus::Committed);

        let again = store.commit(r.id, Utc::now()).await;
        assert!(matches!(again, Err(ReservationError::InvalidState { .. })));

        let level = store
            .stock_level(&SubjectRef::new("SKU-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level, StockLevel::new(3, 0));
    }

    #[tokio::test]
    async fn release_leaves_ledger_untouched() {
        let store = store_with_stock("SKU-1", 5).await;
        let r = store
            .try_reserve(hold("SKU-1", 2, "o1", Utc::now()))
            .await
            .unwrap();

        let released = store
            .release(r.id, ReleaseReason::Cancelled, Utc::now())
            .await
            .unwrap();
        assert_eq!(released.status, ReservationStatus::Cancelled);

        let level = store
            .stock_level(&SubjectRef::new("SKU-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level, StockLevel::new(5, 0));
    }

    #[tokio::test]
    async fn missing_reservation_is_not_found() {
        let store = InMemoryReservationStore::new();
        let id = ReservationId::new();
        assert!(matches!(
            store.commit(id, Utc::now()).await,
            Err(ReservationError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn list_active_is_most_recent_first() {
        let store = store_with_stock("SKU-1", 10).await;
        let t0 = Utc::now();
        let first = store.try_reserve(hold("SKU-1", 1, "o1", t0)).await.unwrap();
        let second = store
            .try_reserve(hold("SKU-1", 1, "o2", t0 + Duration::seconds(1)))
            .await
            .unwrap();
        let third = store
            .try_reserve(hold("SKU-1", 1, "o3", t0 + Duration::seconds(2)))
            .await
            .unwrap();
        store
            .release(second.id, ReleaseReason::Cancelled, Utc::now())
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![third.id, first.id]);
    }

    #[tokio::test]
    async fn find_expired_only_returns_lapsed_active_holds() {
        let store = store_with_stock("SKU-1", 10).await;
        let t0 = Utc::now();
        let lapsed = store.try_reserve(hold("SKU-1", 1, "o1", t0)).await.unwrap();
        let committed = store.try_reserve(hold("SKU-1", 1, "o2", t0)).await.unwrap();
        store
            .try_reserve(hold("SKU-1", 1, "o3", t0 + Duration::minutes(30)))
            .await
            .unwrap();
        store.commit(committed.id, t0).await.unwrap();

        let expired = store
            .find_expired(t0 + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(expired, vec![lapsed.id]);
    }
}
