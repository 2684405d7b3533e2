use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{
    Job, JobId, JobStatus, JobStore, NewJob, QueueError, QueueStats, ResourceContext,
    StatusStats, Tier,
};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const JOB_COLUMNS: &str = r#"
    id,
    payload,
    status::text AS status,
    attempts,
    max_attempts,
    last_error,
    submitted_price,
    submitted_renewable,
    submitted_tier,
    processed_price,
    processed_renewable,
    processed_tier,
    created_at,
    updated_at,
    processing_started_at,
    completed_at,
    worker_id,
    result
"#;

/// Pending while attempts remain, dead otherwise. Shared by `fail` and
/// `recover_stale` so both apply the same accounting.
const SETTLE_FAILURE: &str = r#"
    status = CASE
      WHEN attempts < max_attempts THEN 'pending'::job_status
      ELSE 'dead'::job_status
    END,
    worker_id = NULL,
    processing_started_at = NULL,
    updated_at = now()
"#;

fn db_err(e: sqlx::Error) -> QueueError {
    QueueError::StorageUnavailable(e.to_string())
}

fn millis(d: Duration) -> Result<i64, QueueError> {
    i64::try_from(d.as_millis())
        .map_err(|_| QueueError::Configuration(format!("duration too large: {d:?}")))
}

fn parse_tier(raw: Option<String>) -> Result<Option<Tier>, QueueError> {
    raw.map(|t| t.parse()).transpose()
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, QueueError> {
    let status: String = row.try_get("status").map_err(db_err)?;

    let submitted = ResourceContext {
        price: row.try_get("submitted_price").map_err(db_err)?,
        renewable_available: row.try_get("submitted_renewable").map_err(db_err)?,
        tier: parse_tier(row.try_get("submitted_tier").map_err(db_err)?)?,
    };

    let processed_tier = parse_tier(row.try_get("processed_tier").map_err(db_err)?)?;
    let processed_price: Option<f64> = row.try_get("processed_price").map_err(db_err)?;
    let processed_renewable: Option<bool> = row.try_get("processed_renewable").map_err(db_err)?;
    let processed = (processed_tier.is_some()
        || processed_price.is_some()
        || processed_renewable.is_some())
    .then_some(ResourceContext {
        price: processed_price,
        renewable_available: processed_renewable,
        tier: processed_tier,
    });

    Ok(Job {
        id: row.try_get::<Uuid, _>("id").map_err(db_err)?,
        payload: row.try_get::<String, _>("payload").map_err(db_err)?,
        status: status.parse()?,
        attempts: row.try_get::<i32, _>("attempts").map_err(db_err)?,
        max_attempts: row.try_get::<i32, _>("max_attempts").map_err(db_err)?,
        last_error: row.try_get::<Option<String>, _>("last_error").map_err(db_err)?,
        submitted,
        processed,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(db_err)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(db_err)?,
        processing_started_at: row
            .try_get::<Option<DateTime<Utc>>, _>("processing_started_at")
            .map_err(db_err)?,
        completed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("completed_at")
            .map_err(db_err)?,
        worker_id: row.try_get::<Option<String>, _>("worker_id").map_err(db_err)?,
        result: row.try_get::<Option<Value>, _>("result").map_err(db_err)?,
    })
}

#[async_trait::async_trait]
impl JobStore for PostgresStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId, QueueError> {
        let max_attempts = job.resolved_max_attempts()?;
        let id = Uuid::new_v4();

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (
              id,
              payload,
              max_attempts,
              submitted_price,
              submitted_renewable,
              submitted_tier
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&job.payload)
        .bind(max_attempts)
        .bind(job.submitted.price)
        .bind(job.submitted.renewable_available)
        .bind(job.submitted.tier.map(|t| t.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let id: Uuid = row.try_get("id").map_err(db_err)?;
        tracing::info!(job_id=%id, max_attempts, "enqueued job");
        Ok(id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        // SKIP LOCKED lets concurrent claimants pass over a row another
        // claim is already holding instead of queueing behind it.
        let sql = format!(
            r#"
            WITH next AS (
              SELECT id AS next_id
              FROM jobs
              WHERE status = 'pending'::job_status
              ORDER BY created_at ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE jobs
            SET status = 'processing'::job_status,
                attempts = attempts + 1,
                processing_started_at = now(),
                worker_id = $1,
                updated_at = now()
            FROM next
            WHERE jobs.id = next.next_id
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let job = row.as_ref().map(row_to_job).transpose()?;
        if let Some(job) = &job {
            tracing::info!(job_id=%job.id, worker_id, attempt=job.attempts, "claimed job");
        }
        Ok(job)
    }

    async fn complete(
        &self,
        id: JobId,
        result: Value,
        processed: ResourceContext,
    ) -> Result<bool, QueueError> {
        let affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed'::job_status,
                result = $2,
                processed_price = $3,
                processed_renewable = $4,
                processed_tier = $5,
                last_error = NULL,
                worker_id = NULL,
                processing_started_at = NULL,
                completed_at = now(),
                updated_at = now()
            WHERE id = $1 AND status = 'processing'::job_status
            "#,
        )
        .bind(id)
        .bind(result)
        .bind(processed.price)
        .bind(processed.renewable_available)
        .bind(processed.tier.map(|t| t.as_str()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if affected == 0 {
            tracing::warn!(job_id=%id, "complete ignored: job is not processing");
        }
        Ok(affected > 0)
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<Option<JobStatus>, QueueError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET last_error = $2,
                {SETTLE_FAILURE}
            WHERE id = $1 AND status = 'processing'::job_status
            RETURNING status::text AS status
            "#
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(error)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            tracing::warn!(job_id=%id, "fail ignored: job is not processing");
            return Ok(None);
        };
        let status: String = row.try_get("status").map_err(db_err)?;
        let status: JobStatus = status.parse()?;
        tracing::warn!(job_id=%id, error, new_status=%status, "job attempt failed");
        Ok(Some(status))
    }

    async fn recover_stale(&self, timeout: Duration) -> Result<u64, QueueError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET last_error = 'processing timed out (worker ' || COALESCE(worker_id, '') || ')',
                {SETTLE_FAILURE}
            WHERE status = 'processing'::job_status
              AND processing_started_at < now() - ($1::bigint * interval '1 millisecond')
            "#
        );

        let recovered = sqlx::query(&sql)
            .bind(millis(timeout)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        Ok(recovered)
    }

    async fn pending_count(&self) -> Result<i64, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS depth
            FROM jobs
            WHERE status = 'pending'::job_status
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_get::<i64, _>("depth").map_err(db_err)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_recent(
        &self,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE ($1::text IS NULL OR status::text = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT status::text AS status,
                   COUNT(*) AS count,
                   MIN(created_at) AS oldest,
                   MAX(created_at) AS newest,
                   COALESCE(AVG(attempts), 0)::float8 AS avg_attempts
            FROM jobs
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let entry = StatusStats {
                count: row.try_get("count").map_err(db_err)?,
                oldest: row.try_get("oldest").map_err(db_err)?,
                newest: row.try_get("newest").map_err(db_err)?,
                avg_attempts: row.try_get("avg_attempts").map_err(db_err)?,
            };
            stats.total += entry.count;
            stats.by_status.push((status.parse()?, entry));
        }
        Ok(stats)
    }

    async fn purge_completed(&self, older_than: Duration) -> Result<u64, QueueError> {
        let purged = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status = 'completed'::job_status
              AND completed_at < now() - ($1::bigint * interval '1 millisecond')
            "#,
        )
        .bind(millis(older_than)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if purged > 0 {
            tracing::info!(purged, "purged completed jobs");
        }
        Ok(purged)
    }

    async fn delete(&self, id: JobId) -> Result<(), QueueError> {
        let affected = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();

        if affected == 0 {
            return Err(QueueError::NotFound);
        }
        Ok(())
    }

    async fn retry_dead(&self, id: JobId) -> Result<(), QueueError> {
        let affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending'::job_status,
                attempts = 0,
                last_error = NULL,
                processing_started_at = NULL,
                worker_id = NULL,
                updated_at = now()
            WHERE id = $1 AND status = 'dead'::job_status
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if affected == 0 {
            return Err(QueueError::NotFound);
        }
        tracing::info!(job_id=%id, "dead job returned to pending");
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
