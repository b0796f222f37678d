use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use super::JobQueue;
use crate::core::error::{Result, SyncError};
use crate::models::{Job, JobKind, NewJob};

const JOB_COLUMNS: &str = "id, kind, datasource_id, run_at, attempts, last_error, created_at";

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let kind: String = row.try_get("kind")?;
    Ok(Job {
        id: row.try_get("id")?,
        kind: kind.parse::<JobKind>().map_err(SyncError::Store)?,
        datasource_id: row.try_get("datasource_id")?,
        run_at: row.try_get("run_at")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO sync_jobs (id, kind, datasource_id, run_at) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(job.kind.as_str())
            .bind(job.datasource_id)
            .bind(job.run_at)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn replace_schedule(&self, datasource_id: Uuid, run_at: Option<DateTime<Utc>>) -> Result<Option<Uuid>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sync_jobs WHERE kind = $1 AND datasource_id = $2")
            .bind(JobKind::ScheduledSync.as_str())
            .bind(datasource_id)
            .execute(&mut *tx)
            .await?;

        let id = match run_at {
            Some(run_at) => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO sync_jobs (id, kind, datasource_id, run_at) VALUES ($1, $2, $3, $4)",
                )
                .bind(id)
                .bind(JobKind::ScheduledSync.as_str())
                .bind(datasource_id)
                .bind(run_at)
                .execute(&mut *tx)
                .await?;
                Some(id)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(id)
    }

    async fn cancel_for_datasource(&self, datasource_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_jobs WHERE datasource_id = $1")
            .bind(datasource_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn scheduled_triggers(&self, datasource_id: Uuid) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sync_jobs WHERE kind = $1 AND datasource_id = $2",
            JOB_COLUMNS
        ))
        .bind(JobKind::ScheduledSync.as_str())
        .bind(datasource_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn has_pending(&self, kind: JobKind) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sync_jobs WHERE kind = $1)")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn lease(&self, worker_id: &str, limit: usize, lease: Duration, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| SyncError::Store(format!("invalid lease duration: {}", e)))?;

        // Concurrent workers skip rows another transaction is claiming.
        let rows = sqlx::query(&format!(
            "UPDATE sync_jobs SET locked_by = $1, locked_until = $2 \
             WHERE id IN ( \
                 SELECT id FROM sync_jobs \
                 WHERE run_at <= $3 AND (locked_until IS NULL OR locked_until <= $3) \
                 ORDER BY run_at \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(worker_id)
        .bind(now + lease)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>>>()?;
        jobs.sort_by_key(|j| j.run_at);
        Ok(jobs)
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sync_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retry(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_jobs SET attempts = attempts + 1, run_at = $2, last_error = $3, \
             locked_by = NULL, locked_until = NULL WHERE id = $1",
        )
        .bind(job_id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reschedule(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE sync_jobs SET attempts = 0, run_at = $2, last_error = NULL, \
             locked_by = NULL, locked_until = NULL WHERE id = $1",
        )
        .bind(job_id)
        .bind(run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
