//! Durable [`JobQueue`] backed by the `job_queue` table.
//!
//! A dequeued job is leased rather than removed. If the worker dies before
//! calling `complete` or `retry`, the lease runs out and the job becomes
//! visible again, unless that delivery was its last permitted one. Such jobs
//! are held back from `dequeue` and handed out by `reap_exhausted` instead.

use chrono::Utc;
use sitescan_queue::{Job, JobQueue, QueueError, RetryDecision, RetryPolicy};
use sqlx::{Pool, Row, Sqlite};
use std::time::Duration;

/// SQLite-backed job queue with bounded retries and visibility leases.
#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    pool: Pool<Sqlite>,
    policy: RetryPolicy,
    lease: Duration,
}

impl SqliteJobQueue {
    /// Wrap a migrated pool.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>, policy: RetryPolicy, lease: Duration) -> Self {
        Self {
            pool,
            policy,
            lease,
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn storage(err: sqlx::Error) -> QueueError {
    QueueError::Storage(err.to_string())
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> sitescan_queue::Result<Job> {
    let payload: String = row.try_get("payload").map_err(storage)?;
    let attempts: i64 = row.try_get("attempt_count").map_err(storage)?;

    let mut job: Job = serde_json::from_str(&payload)?;
    job.attempt_count = u32::try_from(attempts).unwrap_or(u32::MAX);
    Ok(job)
}

#[async_trait::async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: Job) -> sitescan_queue::Result<()> {
        let enqueued_at = job.enqueued_at.timestamp_millis();
        sqlx::query(
            "INSERT INTO job_queue (id, analysis_id, payload, attempt_count, enqueued_at_ms, visible_at_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(job.analysis_id.as_str())
        .bind(serde_json::to_string(&job)?)
        .bind(i64::from(job.attempt_count))
        .bind(enqueued_at)
        .bind(enqueued_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::debug!(job_id = %job.id, analysis_id = %job.analysis_id, "Enqueued job");
        Ok(())
    }

    async fn dequeue(&self) -> sitescan_queue::Result<Option<Job>> {
        let now = now_ms();
        let row = sqlx::query(
            "UPDATE job_queue
             SET attempt_count = attempt_count + 1, lease_until_ms = ?
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE visible_at_ms <= ?
                   AND (lease_until_ms IS NULL OR lease_until_ms <= ?)
                   AND attempt_count < ?
                 ORDER BY visible_at_ms, rowid
                 LIMIT 1
             )
             RETURNING payload, attempt_count",
        )
        .bind(now.saturating_add(millis(self.lease)))
        .bind(now)
        .bind(now)
        .bind(i64::from(self.policy.max_attempts))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete(&self, job: &Job) -> sitescan_queue::Result<()> {
        sqlx::query("DELETE FROM job_queue WHERE id = ?")
            .bind(&job.id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn retry(&self, job: Job) -> sitescan_queue::Result<RetryDecision> {
        if self.policy.is_exhausted(job.attempt_count) {
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempt_count,
                "Job exhausted its attempts, abandoning"
            );
            self.complete(&job).await?;
            return Ok(RetryDecision::Exhausted {
                attempts: job.attempt_count,
            });
        }

        let delay = self.policy.delay_for(job.attempt_count);
        let result = sqlx::query(
            "UPDATE job_queue SET visible_at_ms = ?, lease_until_ms = NULL WHERE id = ?",
        )
        .bind(now_ms().saturating_add(millis(delay)))
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotClaimed(job.id));
        }

        let attempt = job.attempt_count + 1;
        tracing::debug!(job_id = %job.id, attempt, ?delay, "Scheduling job retry");
        Ok(RetryDecision::Scheduled { attempt, delay })
    }

    async fn reap_exhausted(&self) -> sitescan_queue::Result<Vec<Job>> {
        let rows = sqlx::query(
            "DELETE FROM job_queue
             WHERE attempt_count >= ? AND lease_until_ms IS NOT NULL AND lease_until_ms <= ?
             RETURNING payload, attempt_count",
        )
        .bind(i64::from(self.policy.max_attempts))
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let jobs = rows
            .iter()
            .map(job_from_row)
            .collect::<sitescan_queue::Result<Vec<_>>>()?;
        for job in &jobs {
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempt_count,
                "Lease expired on final attempt, abandoning job"
            );
        }
        Ok(jobs)
    }

    async fn len(&self) -> sitescan_queue::Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_queue
             WHERE (lease_until_ms IS NULL OR lease_until_ms <= ?) AND attempt_count < ?",
        )
        .bind(now_ms())
        .bind(i64::from(self.policy.max_attempts))
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}
