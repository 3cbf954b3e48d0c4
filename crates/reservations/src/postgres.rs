use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OwnerRef, ReservationId, SubjectRef};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ReleaseReason, Reservation, ReservationError, ReservationStatus, Result, StockLevel,
    store::ReservationStore,
};

const RESERVATION_COLUMNS: &str =
    "id, subject_ref, quantity, owner_ref, status, created_at, expires_at, released_at";

/// PostgreSQL-backed reservation store.
///
/// `try_reserve` takes a row lock on the subject's ledger row
/// (`SELECT ... FOR UPDATE`) before summing active holds, so concurrent
/// reservations of one subject are serialized while different subjects
/// proceed in parallel.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    /// Creates a new PostgreSQL reservation store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let status: String = row.try_get("status")?;
        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            subject_ref: SubjectRef::new(row.try_get::<String, _>("subject_ref")?),
            quantity: to_u32(row.try_get("quantity")?, "quantity")?,
            owner_ref: OwnerRef::new(row.try_get::<String, _>("owner_ref")?),
            status: ReservationStatus::parse(&status)?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            released_at: row.try_get("released_at")?,
        })
    }

    /// Conditionally moves an active reservation to `status` inside `tx`.
    ///
    /// The `status = 'active'` guard makes commit and release mutually
    /// exclusive: whichever statement locks the row first wins, and the other
    /// matches zero rows.
    async fn transition(
        tx: &mut Transaction<'_, Postgres>,
        id: ReservationId,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let row = sqlx::query(&format!(
            "UPDATE reservations SET status = $2, released_at = $3 \
             WHERE id = $1 AND status = 'active' \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Self::row_to_reservation(row),
            None => {
                let current: Option<String> =
                    sqlx::query_scalar("SELECT status FROM reservations WHERE id = $1")
                        .bind(id.as_uuid())
                        .fetch_optional(&mut **tx)
                        .await?;
                match current {
                    None => Err(ReservationError::NotFound(id)),
                    Some(actual) => Err(ReservationError::InvalidState {
                        id,
                        expected: ReservationStatus::Active,
                        actual: ReservationStatus::parse(&actual)?,
                    }),
                }
            }
        }
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ReservationError::Decode(format!("{column} out of range: {value}")))
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    async fn set_stock(
        &self,
        subject: &SubjectRef,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_ledger (subject_ref, quantity, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (subject_ref) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(subject.as_str())
        .bind(i64::from(quantity))
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stock_level(&self, subject: &SubjectRef) -> Result<Option<StockLevel>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT l.quantity AS on_hand,
                   COALESCE((
                       SELECT SUM(r.quantity) FROM reservations r
                       WHERE r.subject_ref = l.subject_ref AND r.status = 'active'
                   ), 0)::BIGINT AS reserved
            FROM stock_ledger l
            WHERE l.subject_ref = $1
            "#,
        )
        .bind(subject.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(StockLevel::new(
                to_u32(row.try_get("on_hand")?, "on_hand")?,
                to_u32(row.try_get("reserved")?, "reserved")?,
            ))),
            None => Ok(None),
        }
    }

    async fn try_reserve(&self, reservation: Reservation) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        // Serializes all reservations of this subject until the transaction ends.
        let on_hand: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM stock_ledger WHERE subject_ref = $1 FOR UPDATE",
        )
        .bind(reservation.subject_ref.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let reserved: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM reservations \
             WHERE subject_ref = $1 AND status = 'active'",
        )
        .bind(reservation.subject_ref.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let available = (on_hand.unwrap_or(0) - reserved).max(0);
        if available < i64::from(reservation.quantity) {
            tx.rollback().await?;
            return Err(ReservationError::InsufficientStock {
                subject: reservation.subject_ref,
                requested: reservation.quantity,
                available: to_u32(available, "available")?,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO reservations (id, subject_ref, quantity, owner_ref, status, created_at,
                                      expires_at, released_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.subject_ref.as_str())
        .bind(i64::from(reservation.quantity))
        .bind(reservation.owner_ref.as_str())
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.released_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn commit(&self, id: ReservationId, at: DateTime<Utc>) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        let reservation =
            Self::transition(&mut tx, id, ReservationStatus::Committed, at).await?;

        let updated = sqlx::query(
            r#"
            UPDATE stock_ledger
            SET quantity = quantity - $2, updated_at = $3
            WHERE subject_ref = $1 AND quantity >= $2
            "#,
        )
        .bind(reservation.subject_ref.as_str())
        .bind(i64::from(reservation.quantity))
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // The ledger was lowered below the hold after it was taken.
            let on_hand: Option<i64> =
                sqlx::query_scalar("SELECT quantity FROM stock_ledger WHERE subject_ref = $1")
                    .bind(reservation.subject_ref.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(ReservationError::InsufficientStock {
                subject: reservation.subject_ref,
                requested: reservation.quantity,
                available: to_u32(on_hand.unwrap_or(0).max(0), "quantity")?,
            });
        }

        tx.commit().await?;
        Ok(reservation)
    }

    async fn release(
        &self,
        id: ReservationId,
        reason: ReleaseReason,
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;
        let reservation = Self::transition(&mut tx, id, reason.into(), at).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'active' ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn list_active_for_owner(&self, owner: &OwnerRef) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'active' AND owner_ref = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM reservations WHERE status = 'active' AND expires_at <= $1 \
             ORDER BY expires_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(ReservationId::from_uuid).collect())
    }
}
