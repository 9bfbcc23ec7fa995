//! Postgres-backed job store.
//!
//! Claims use a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)`
//! so concurrent runs never hand out the same row, and a run blocked on a
//! locked row moves on to the next pending one instead of waiting.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | PoolTimedOut, PoolClosed, Io | `Unavailable` |
//! | Database, RowNotFound, Decode, other | `Storage` |
//!
//! A conditional update that matches no row is resolved by re-reading the
//! job's status, so callers still get `NotFound` or `InvalidTransition`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use vigil_core::OrgId;

use super::store::{JobFilter, JobStore, JobStoreError};
use super::types::{ErrorLogEntry, Job, JobId, JobOutcome, JobStatus, JobType, NewJob};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    seq             BIGSERIAL,
    id              UUID PRIMARY KEY,
    job_type        TEXT NOT NULL,
    payload         JSONB NOT NULL DEFAULT '{}'::jsonb,
    org_id          UUID,
    status          TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'processing', 'done', 'failed')),
    items_total     INTEGER NOT NULL DEFAULT 0 CHECK (items_total >= 0),
    items_processed INTEGER NOT NULL DEFAULT 0 CHECK (items_processed >= 0),
    items_failed    INTEGER NOT NULL DEFAULT 0 CHECK (items_failed >= 0),
    error_log       JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    started_at      TIMESTAMPTZ,
    completed_at    TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS jobs_pending_idx
    ON jobs (created_at, seq) WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS jobs_processing_started_idx
    ON jobs (started_at) WHERE status = 'processing';
"#;

const JOB_COLUMNS: &str = "id, job_type, payload, org_id, status, items_total, items_processed, \
     items_failed, error_log, created_at, started_at, completed_at";

/// Postgres-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `jobs` table and its indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn current_status(&self, job_id: JobId) -> Result<JobStatus, JobStoreError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_status", e))?
            .ok_or(JobStoreError::NotFound(job_id))?;

        let status: String = row
            .try_get("status")
            .map_err(|e| map_sqlx_error("current_status", e))?;
        status.parse().map_err(JobStoreError::Storage)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, new), fields(job_type = %new.job_type), err)]
    async fn enqueue(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::new(new);
        let sql = format!(
            "INSERT INTO jobs (id, job_type, payload, org_id, status, created_at) \
             VALUES ($1, $2, $3, $4, 'pending', $5) RETURNING {JOB_COLUMNS}"
        );
        let row: JobRow = sqlx::query_as(&sql)
            .bind(job.id.0)
            .bind(job.job_type.as_str())
            .bind(Json(&job.payload))
            .bind(job.org_id.map(|o| *o.as_uuid()))
            .bind(job.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
        row.try_into()
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn claim_next_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'processing',
                started_at = now(),
                items_total = CASE
                    WHEN jsonb_typeof(payload -> 'items') = 'array'
                         AND jsonb_array_length(payload -> 'items') > 0
                    THEN jsonb_array_length(payload -> 'items')
                    ELSE 1
                END
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at, seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next_pending", e))?;
        row.map(Job::try_from).transpose()
    }

    async fn record_progress(
        &self,
        job_id: JobId,
        items_processed: u32,
        items_failed: u32,
        failure: Option<ErrorLogEntry>,
    ) -> Result<(), JobStoreError> {
        let appended: Vec<ErrorLogEntry> = failure.into_iter().collect();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET items_processed = GREATEST(items_processed, $2),
                items_failed = GREATEST(items_failed, $3),
                error_log = error_log || $4::jsonb
            WHERE id = $1
              AND status = 'processing'
              AND GREATEST(items_processed, $2) + GREATEST(items_failed, $3) <= items_total
            "#,
        )
        .bind(job_id.0)
        .bind(to_db_count(items_processed)?)
        .bind(to_db_count(items_failed)?)
        .bind(Json(appended))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_progress", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.current_status(job_id).await? {
            JobStatus::Processing => Err(JobStoreError::InvalidProgress(job_id)),
            from => Err(JobStoreError::InvalidTransition {
                job_id,
                from,
                to: JobStatus::Processing,
            }),
        }
    }

    #[instrument(skip(self, outcome), fields(status = %outcome.status), err)]
    async fn finalize(&self, job_id: JobId, outcome: JobOutcome) -> Result<Job, JobStoreError> {
        if !outcome.status.is_terminal() {
            return Err(JobStoreError::InvalidTransition {
                job_id,
                from: JobStatus::Processing,
                to: outcome.status,
            });
        }

        let sql = format!(
            r#"
            UPDATE jobs
            SET status = $2,
                items_processed = $3,
                items_failed = $4,
                items_total = GREATEST(items_total, $3 + $4),
                error_log = $5,
                completed_at = now()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.0)
            .bind(outcome.status.as_str())
            .bind(to_db_count(outcome.items_processed)?)
            .bind(to_db_count(outcome.items_failed)?)
            .bind(Json(&outcome.error_log))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("finalize", e))?;

        match row {
            Some(row) => row.try_into(),
            None => Err(JobStoreError::InvalidTransition {
                job_id,
                from: self.current_status(job_id).await?,
                to: outcome.status,
            }),
        }
    }

    async fn list_recent(&self, filter: JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR job_type = $2)
            ORDER BY created_at DESC, seq DESC
            LIMIT $3
            "#
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.job_type.as_deref())
            .bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_recent", e))?;
        rows.into_iter().map(Job::try_from).collect()
    }

    #[instrument(skip(self), err)]
    async fn reclaim_stuck(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobId>, JobStoreError> {
        let entry = Json(vec![ErrorLogEntry::synthetic(reason)]);
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                items_failed = items_failed + 1,
                items_total = GREATEST(items_total, items_processed + items_failed + 1),
                error_log = error_log || $2::jsonb,
                completed_at = now()
            WHERE status = 'processing' AND started_at < $1
            RETURNING id
            "#,
        )
        .bind(started_before)
        .bind(entry)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reclaim_stuck", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(JobId::from_uuid)
                    .map_err(|e| map_sqlx_error("reclaim_stuck", e))
            })
            .collect()
    }
}

/// Raw `jobs` row.
#[derive(Debug)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: Json<serde_json::Value>,
    org_id: Option<Uuid>,
    status: String,
    items_total: i32,
    items_processed: i32,
    items_failed: i32,
    error_log: Json<Vec<ErrorLogEntry>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            org_id: row.try_get("org_id")?,
            status: row.try_get("status")?,
            items_total: row.try_get("items_total")?,
            items_processed: row.try_get("items_processed")?,
            items_failed: row.try_get("items_failed")?,
            error_log: row.try_get("error_log")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: JobId::from_uuid(row.id),
            job_type: JobType::new(row.job_type),
            payload: row.payload.0,
            org_id: row.org_id.map(OrgId::from_uuid),
            status: row.status.parse().map_err(JobStoreError::Storage)?,
            items_total: from_db_count(row.items_total),
            items_processed: from_db_count(row.items_processed),
            items_failed: from_db_count(row.items_failed),
            error_log: row.error_log.0,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn to_db_count(n: u32) -> Result<i32, JobStoreError> {
    i32::try_from(n).map_err(|_| JobStoreError::Storage(format!("counter out of range: {n}")))
}

fn from_db_count(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

/// Map SQLx errors to job store errors.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            JobStoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
