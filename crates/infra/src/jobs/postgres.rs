//! Postgres-backed job record store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database / PoolClosed / Io / other | `Storage` |
//! | zero rows on a guarded update | `NotFound` or `IllegalTransition` (after re-reading the row) |
//!
//! All status changes are single guarded `UPDATE ... WHERE status = ...`
//! statements, so concurrent workers cannot both claim the same row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, instrument};

use bioforge_core::{JobId, JobType, UserId};

use super::store::{JobStore, JobStoreError};
use super::types::{ClaimOutcome, JobRecord, JobStats, JobStatus, NewJob};

const COLUMNS: &str = "id, job_type, status, user_id, input_data, result_data, error_message, \
                       created_at, updated_at, completed_at";

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS ai_jobs (
        id            BIGSERIAL PRIMARY KEY,
        job_type      TEXT        NOT NULL,
        status        TEXT        NOT NULL DEFAULT 'pending'
                      CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
        user_id       BIGINT      NOT NULL,
        input_data    JSONB       NOT NULL,
        result_data   JSONB,
        error_message TEXT,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        completed_at  TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ai_jobs_status_updated_idx ON ai_jobs (status, updated_at)",
];

/// Postgres-backed [`JobStore`] over the `ai_jobs` table.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

#[derive(Debug)]
struct JobRow {
    id: i64,
    job_type: String,
    status: String,
    user_id: i64,
    input_data: JsonValue,
    result_data: Option<JsonValue>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            status: row.try_get("status")?,
            user_id: row.try_get("user_id")?,
            input_data: row.try_get("input_data")?,
            result_data: row.try_get("result_data")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type: JobType = row
            .job_type
            .parse()
            .map_err(|e| JobStoreError::Storage(format!("job {}: {e}", row.id)))?;
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| JobStoreError::Storage(format!("job {}: {e}", row.id)))?;

        Ok(JobRecord {
            id: JobId::new(row.id),
            job_type,
            status,
            user_id: UserId::new(row.user_id),
            input_data: row.input_data,
            result_data: row.result_data,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `ai_jobs` table and its index if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn fetch_row(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {COLUMNS} FROM ai_jobs WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(JobRecord::try_from).transpose()
    }

    /// Explain why a guarded update touched no rows.
    async fn rejected_transition(&self, id: JobId, to: JobStatus) -> JobStoreError {
        match self.fetch_row(id).await {
            Ok(Some(job)) => JobStoreError::IllegalTransition {
                id,
                from: job.status,
                to,
            },
            Ok(None) => JobStoreError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_type = %job.job_type, user_id = %job.user_id), err)]
    async fn insert(&self, job: NewJob) -> Result<JobRecord, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO ai_jobs (job_type, status, user_id, input_data) \
             VALUES ($1, 'pending', $2, $3) RETURNING {COLUMNS}"
        ))
        .bind(job.job_type.as_str())
        .bind(job.user_id.get())
        .bind(&job.input_data)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        let record = JobRecord::try_from(row)?;
        debug!(job_id = %record.id, "job inserted");
        Ok(record)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        self.fetch_row(id).await
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn claim(&self, id: JobId) -> Result<ClaimOutcome, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE ai_jobs SET status = 'processing', updated_at = now() \
             WHERE id = $1 AND status = 'pending' RETURNING {COLUMNS}"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        if let Some(row) = row {
            return Ok(ClaimOutcome::Claimed(JobRecord::try_from(row)?));
        }

        let status: Option<String> = sqlx::query("SELECT status FROM ai_jobs WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim", e))?
            .map(|row| row.try_get::<String, _>("status"))
            .transpose()
            .map_err(|e| map_sqlx_error("claim", e))?;

        match status {
            None => Ok(ClaimOutcome::NotFound),
            Some(status) => {
                let status = status
                    .parse::<JobStatus>()
                    .map_err(|e| JobStoreError::Storage(format!("job {id}: {e}")))?;
                Ok(ClaimOutcome::AlreadyClaimed(status))
            }
        }
    }

    #[instrument(skip(self, result), fields(job_id = %id), err)]
    async fn complete(&self, id: JobId, result: JsonValue) -> Result<JobRecord, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE ai_jobs SET status = 'completed', result_data = $2, error_message = NULL, \
             updated_at = now(), completed_at = now() \
             WHERE id = $1 AND status = 'processing' RETURNING {COLUMNS}"
        ))
        .bind(id.get())
        .bind(&result)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        match row {
            Some(row) => JobRecord::try_from(row),
            None => Err(self.rejected_transition(id, JobStatus::Completed).await),
        }
    }

    #[instrument(skip(self, message), fields(job_id = %id), err)]
    async fn fail(&self, id: JobId, message: &str) -> Result<JobRecord, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE ai_jobs SET status = 'failed', error_message = $2, result_data = NULL, \
             updated_at = now(), completed_at = now() \
             WHERE id = $1 AND status = 'processing' RETURNING {COLUMNS}"
        ))
        .bind(id.get())
        .bind(message)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        match row {
            Some(row) => JobRecord::try_from(row),
            None => Err(self.rejected_transition(id, JobStatus::Failed).await),
        }
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn touch(&self, id: JobId) -> Result<bool, JobStoreError> {
        let result = sqlx::query(
            "UPDATE ai_jobs SET updated_at = now() WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.get())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("touch", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.fetch_row(id).await? {
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self), fields(status = %status), err)]
    async fn list_stale(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM ai_jobs WHERE status = $1 AND updated_at < $2 \
             ORDER BY updated_at ASC, id ASC LIMIT $3"
        ))
        .bind(status.as_str())
        .bind(older_than)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stale", e))?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM ai_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let count: i64 = row.try_get("count").map_err(|e| map_sqlx_error("stats", e))?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Storage(e.to_string()))?;
            stats.record(status, u64::try_from(count).unwrap_or(0));
        }
        Ok(stats)
    }
}

/// Map SQLx errors to `JobStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none")
        )),
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Storage(format!("timed out acquiring a connection in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_storage() {
        let err = map_sqlx_error("claim", sqlx::Error::PoolClosed);
        assert_eq!(
            err,
            JobStoreError::Storage("connection pool closed in claim".to_string())
        );
    }

    #[test]
    fn rows_with_unknown_status_are_rejected() {
        let row = JobRow {
            id: 7,
            job_type: "generate".to_string(),
            status: "running".to_string(),
            user_id: 1,
            input_data: JsonValue::Null,
            result_data: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        let err = JobRecord::try_from(row).unwrap_err();
        assert!(err.to_string().contains("job 7"));
    }

    #[test]
    fn rows_convert_to_records() {
        let now = Utc::now();
        let row = JobRow {
            id: 3,
            job_type: "analyze".to_string(),
            status: "completed".to_string(),
            user_id: 11,
            input_data: serde_json::json!({"algorithmId": 5, "analysisType": "sanity"}),
            result_data: Some(serde_json::json!({"score": 80})),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };
        let record = JobRecord::try_from(row).unwrap();
        assert_eq!(record.id, JobId::new(3));
        assert_eq!(record.job_type, JobType::Analyze);
        assert_eq!(record.status, JobStatus::Completed);
    }
}
