use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::JobId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Job, JobError, JobKind, JobStatus, QueueStats, Result,
    store::{JobStore, RequeueOutcome},
};

const JOB_COLUMNS: &str = "id, kind, payload, status, attempts, max_attempts, created_at, \
                           run_at, claimed_at, processed_at, last_error";

/// PostgreSQL-backed job store.
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so any number of worker processes
/// can poll the same table without handing one job to two of them.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Creates a new PostgreSQL job store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_job(row: PgRow) -> Result<Job> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: JobId::from_uuid(row.try_get::<Uuid, _>("id")?),
            kind: JobKind::parse(&kind)?,
            payload: row.try_get("payload")?,
            status: JobStatus::parse(&status)?,
            attempts: to_u32(row.try_get("attempts")?, "attempts")?,
            max_attempts: to_u32(row.try_get("max_attempts")?, "max_attempts")?,
            created_at: row.try_get("created_at")?,
            run_at: row.try_get("run_at")?,
            claimed_at: row.try_get("claimed_at")?,
            processed_at: row.try_get("processed_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    /// Explains why an update fenced on claim `attempt` matched no row.
    async fn transition_error(&self, id: JobId, attempt: u32) -> Result<JobError> {
        let current: Option<(String, i32)> =
            sqlx::query_as("SELECT status, attempts FROM jobs WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        let Some((status, attempts)) = current else {
            return Ok(JobError::NotFound(id));
        };
        Ok(match JobStatus::parse(&status)? {
            JobStatus::Active => JobError::StaleClaim {
                id,
                attempt,
                current: to_u32(attempts, "attempts")?,
            },
            actual => JobError::InvalidState {
                id,
                expected: JobStatus::Active,
                actual,
            },
        })
    }
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| JobError::Decode(format!("{column} out of range: {value}")))
}

fn to_i32(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| JobError::Decode(format!("{column} out of range: {value}")))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, payload, status, attempts, max_attempts, created_at,
                              run_at, claimed_at, processed_at, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(to_i32(job.attempts, "attempts")?)
        .bind(to_i32(job.max_attempts, "max_attempts")?)
        .bind(job.created_at)
        .bind(job.run_at)
        .bind(job.claimed_at)
        .bind(job.processed_at)
        .bind(&job.last_error)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_job).transpose()
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_job).collect()
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            WITH next AS (
                SELECT id FROM jobs
                WHERE status IN ('waiting', 'delayed')
                  AND run_at <= $1
                  AND attempts < max_attempts
                ORDER BY run_at, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs j
            SET status = 'active', claimed_at = $1, attempts = j.attempts + 1
            FROM next
            WHERE j.id = next.id
            RETURNING {}
            "#,
            qualified_columns("j")
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_job).transpose()
    }

    async fn complete(&self, id: JobId, attempt: u32, at: DateTime<Utc>) -> Result<Job> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = 'completed', claimed_at = NULL, processed_at = $3, \
             last_error = NULL \
             WHERE id = $1 AND status = 'active' AND attempts = $2 \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(to_i32(attempt, "attempts")?)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_job(row),
            None => Err(self.transition_error(id, attempt).await?),
        }
    }

    async fn fail(
        &self,
        id: JobId,
        attempt: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Job> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                status = CASE WHEN $3::TIMESTAMPTZ IS NOT NULL AND attempts < max_attempts
                              THEN 'delayed' ELSE 'failed' END,
                run_at = CASE WHEN $3::TIMESTAMPTZ IS NOT NULL AND attempts < max_attempts
                              THEN $3 ELSE run_at END,
                claimed_at = NULL,
                processed_at = $4,
                last_error = $5
            WHERE id = $1 AND status = 'active' AND attempts = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(to_i32(attempt, "attempts")?)
        .bind(retry_at)
        .bind(at)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_job(row),
            None => Err(self.transition_error(id, attempt).await?),
        }
    }

    async fn requeue_stuck(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RequeueOutcome> {
        let statuses: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE jobs SET
                status = CASE WHEN attempts < max_attempts THEN 'delayed' ELSE 'failed' END,
                run_at = CASE WHEN attempts < max_attempts THEN $2 ELSE run_at END,
                processed_at = CASE WHEN attempts < max_attempts THEN processed_at ELSE $2 END,
                claimed_at = NULL,
                last_error = 'visibility timeout expired'
            WHERE status = 'active' AND claimed_at <= $1
            RETURNING status
            "#,
        )
        .bind(claimed_before)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut outcome = RequeueOutcome::default();
        for status in statuses {
            match JobStatus::parse(&status)? {
                JobStatus::Failed => outcome.failed += 1,
                _ => outcome.requeued += 1,
            }
        }
        Ok(outcome)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND processed_at <= $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn counts(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.add(JobStatus::parse(&status)?, u64::try_from(count).unwrap_or(0));
        }
        Ok(stats)
    }
}

fn qualified_columns(alias: &str) -> String {
    JOB_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
