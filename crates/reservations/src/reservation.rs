use chrono::{DateTime, Duration, Utc};
use common::{OwnerRef, ReservationId, SubjectRef};
use serde::{Deserialize, Serialize};

use crate::{ReservationError, Result};

/// Lifecycle state of a reservation.
///
/// ```text
/// Active ──┬──► Committed
///          ├──► Cancelled
///          └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding stock; counts against availability.
    Active,
    /// Permanently applied to the ledger (terminal).
    Committed,
    /// Explicitly released by checkout or an operator (terminal).
    Cancelled,
    /// Released by the sweeper after `expires_at` (terminal).
    Expired,
}

impl ReservationStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    /// Returns the database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }

    /// Parses the database representation.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "committed" => Ok(ReservationStatus::Committed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(ReservationError::Decode(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an active reservation is being released without a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Cancelled,
    Expired,
}

impl From<ReleaseReason> for ReservationStatus {
    fn from(reason: ReleaseReason) -> Self {
        match reason {
            ReleaseReason::Cancelled => ReservationStatus::Cancelled,
            ReleaseReason::Expired => ReservationStatus::Expired,
        }
    }
}

/// A time-boxed hold on stock for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub subject_ref: SubjectRef,
    pub quantity: u32,
    pub owner_ref: OwnerRef,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// When the reservation reached its terminal state.
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Builds a new active reservation expiring `ttl` after `now`.
    ///
    /// Fails with `InvalidTtl` when the expiry is not a representable timestamp.
    pub fn new(
        subject_ref: SubjectRef,
        quantity: u32,
        owner_ref: OwnerRef,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(ReservationError::InvalidTtl {
                seconds: ttl.num_seconds(),
            })?;
        Ok(Self {
            id: ReservationId::new(),
            subject_ref,
            quantity,
            owner_ref,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at,
            released_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// True once the hold has outlived its TTL, whether or not it was swept.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }

    /// Checks that the reservation can leave the active state.
    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ReservationError::InvalidState {
                id: self.id,
                expected: ReservationStatus::Active,
                actual: self.status,
            })
        }
    }
}

/// Snapshot of a subject's stock position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    /// Quantity recorded in the ledger.
    pub on_hand: u32,
    /// Sum of active reservation quantities.
    pub reserved: u32,
    /// `on_hand - reserved`, floored at zero.
    pub available: u32,
}

impl StockLevel {
    pub fn new(on_hand: u32, reserved: u32) -> Self {
        Self {
            on_hand,
            reserved,
            available: on_hand.saturating_sub(reserved),
        }
    }
}
