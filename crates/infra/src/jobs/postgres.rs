//! Postgres-backed job store.
//!
//! Jobs live in `scheduled_jobs`, keyed by `(job_group, job_name)`. Claims use
//! `FOR UPDATE SKIP LOCKED` so several executors (or processes) can poll the
//! same table without handing out a job twice.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (register only) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / other | N/A | `Storage` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobAttemptRecord, JobKey, JobStatus, RetryPolicy};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_jobs (
        job_group          TEXT        NOT NULL,
        job_name           TEXT        NOT NULL,
        job_type           TEXT        NOT NULL,
        payload            JSONB       NOT NULL,
        status             TEXT        NOT NULL,
        last_error         TEXT,
        attempt            INTEGER     NOT NULL DEFAULT 0,
        max_attempts       INTEGER     NOT NULL DEFAULT 1,
        retry_delay_ms     BIGINT      NOT NULL DEFAULT 0,
        history            JSONB       NOT NULL DEFAULT '[]'::jsonb,
        run_at             TIMESTAMPTZ NOT NULL,
        created_at         TIMESTAMPTZ NOT NULL,
        updated_at         TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (job_group, job_name)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_ready ON scheduled_jobs (status, run_at)",
];

const COLUMNS: &str = "job_group, job_name, job_type, payload, status, last_error, attempt, \
     max_attempts, retry_delay_ms, history, run_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the jobs table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job = %job.key), err)]
    async fn register(&self, job: Job) -> Result<JobKey, JobStoreError> {
        let history = serde_json::to_value(&job.history)
            .map_err(|e| JobStoreError::Storage(format!("failed to encode job history: {e}")))?;

        sqlx::query(&format!(
            "INSERT INTO scheduled_jobs ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(&job.key.group)
        .bind(&job.key.name)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(last_error(&job.status))
        .bind(job.attempt as i32)
        .bind(job.retry_policy.max_attempts as i32)
        .bind(job.retry_policy.delay.as_millis() as i64)
        .bind(history)
        .bind(job.run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.key.clone())
            } else {
                map_sqlx_error("register", e)
            }
        })?;

        Ok(job.key)
    }

    async fn get(&self, key: &JobKey) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM scheduled_jobs WHERE job_group = $1 AND job_name = $2"
        ))
        .bind(&key.group)
        .bind(&key.name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip(self), fields(job = %key), err)]
    async fn delete(&self, key: &JobKey) -> Result<bool, JobStoreError> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE job_group = $1 AND job_name = $2")
            .bind(&key.group)
            .bind(&key.name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self, group: &str) -> Result<Vec<JobKey>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT job_group, job_name FROM scheduled_jobs WHERE job_group = $1 ORDER BY created_at ASC",
        )
        .bind(group)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_keys", e))?;

        rows.iter()
            .map(|row| {
                Ok(JobKey::new(
                    row.try_get::<String, _>("job_group").map_err(decode_error)?,
                    row.try_get::<String, _>("job_name").map_err(decode_error)?,
                ))
            })
            .collect()
    }

    async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE scheduled_jobs
            SET status = 'running', attempt = attempt + 1, updated_at = NOW()
            WHERE (job_group, job_name) = (
                SELECT job_group, job_name
                FROM scheduled_jobs
                WHERE status = 'pending'
                  AND run_at <= NOW()
                  AND job_type = ANY($1)
                ORDER BY run_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(job_types)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let history = serde_json::to_value(&job.history)
            .map_err(|e| JobStoreError::Storage(format!("failed to encode job history: {e}")))?;

        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET status = $3, last_error = $4, attempt = $5, history = $6,
                run_at = $7, updated_at = $8, payload = $9
            WHERE job_group = $1 AND job_name = $2
            "#,
        )
        .bind(&job.key.group)
        .bind(&job.key.name)
        .bind(job.status.as_str())
        .bind(last_error(&job.status))
        .bind(job.attempt as i32)
        .bind(history)
        .bind(job.run_at)
        .bind(job.updated_at)
        .bind(&job.payload)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.key.clone()));
        }
        Ok(())
    }
}

fn last_error(status: &JobStatus) -> Option<&str> {
    match status {
        JobStatus::Failed { error, .. } => Some(error.as_str()),
        _ => None,
    }
}

fn decode_job(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    JobRow::from_row(row).map_err(decode_error)?.try_into()
}

fn decode_error(e: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("failed to decode job row: {e}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => JobStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    job_group: String,
    job_name: String,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    last_error: Option<String>,
    attempt: i32,
    max_attempts: i32,
    retry_delay_ms: i64,
    history: serde_json::Value,
    run_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            job_group: row.try_get("job_group")?,
            job_name: row.try_get("job_name")?,
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            last_error: row.try_get("last_error")?,
            attempt: row.try_get("attempt")?,
            max_attempts: row.try_get("max_attempts")?,
            retry_delay_ms: row.try_get("retry_delay_ms")?,
            history: row.try_get("history")?,
            run_at: row.try_get("run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let attempt = row.attempt.max(0) as u32;
        let status = match row.status.as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed {
                error: row.last_error.unwrap_or_default(),
                attempts: attempt,
            },
            other => {
                return Err(JobStoreError::Storage(format!("unknown job status: {other}")));
            }
        };
        let history: Vec<JobAttemptRecord> = serde_json::from_value(row.history)
            .map_err(|e| JobStoreError::Storage(format!("failed to decode job history: {e}")))?;

        Ok(Job {
            key: JobKey::new(row.job_group, row.job_name),
            job_type: row.job_type,
            payload: row.payload,
            status,
            retry_policy: RetryPolicy {
                max_attempts: row.max_attempts.max(0) as u32,
                delay: Duration::from_millis(row.retry_delay_ms.max(0) as u64),
            },
            attempt,
            run_at: row.run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> JobRow {
        let now = Utc::now();
        JobRow {
            job_group: "geoip-batches".into(),
            job_name: "batch-1".into(),
            job_type: "geoip.batch".into(),
            payload: serde_json::json!({"x": 1}),
            status: status.into(),
            last_error: Some("boom".into()),
            attempt: 1,
            max_attempts: 3,
            retry_delay_ms: 1500,
            history: serde_json::json!([]),
            run_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn decodes_failed_row() {
        let job = Job::try_from(row("failed")).unwrap();
        assert_eq!(job.key, JobKey::new("geoip-batches", "batch-1"));
        assert_eq!(
            job.status,
            JobStatus::Failed {
                error: "boom".into(),
                attempts: 1
            }
        );
        assert_eq!(job.retry_policy.delay, Duration::from_millis(1500));
        assert_eq!(job.retry_policy.max_attempts, 3);
    }

    #[test]
    fn unknown_status_is_a_storage_error() {
        assert!(matches!(
            Job::try_from(row("exploded")),
            Err(JobStoreError::Storage(_))
        ));
    }

    #[test]
    fn last_error_only_for_failed() {
        assert_eq!(last_error(&JobStatus::Pending), None);
        assert_eq!(
            last_error(&JobStatus::Failed {
                error: "e".into(),
                attempts: 1
            }),
            Some("e")
        );
    }
}
