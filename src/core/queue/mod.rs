pub mod memory;
pub mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::core::error::Result;
use crate::models::{Job, JobKind, NewJob};

/// Durable at-least-once job queue.
///
/// A leased job is invisible to other workers until its lease expires; it is
/// redelivered afterwards unless acked, retried or rescheduled. Operations on
/// jobs that no longer exist are no-ops.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid>;

    /// Atomically drops any scheduled trigger of `datasource_id` and, when
    /// `run_at` is set, registers the replacement.
    async fn replace_schedule(&self, datasource_id: Uuid, run_at: Option<DateTime<Utc>>) -> Result<Option<Uuid>>;

    /// Removes every pending job of the datasource.
    async fn cancel_for_datasource(&self, datasource_id: Uuid) -> Result<u64>;

    async fn scheduled_triggers(&self, datasource_id: Uuid) -> Result<Vec<Job>>;

    async fn has_pending(&self, kind: JobKind) -> Result<bool>;

    async fn lease(&self, worker_id: &str, limit: usize, lease: Duration, now: DateTime<Utc>) -> Result<Vec<Job>>;

    async fn ack(&self, job_id: Uuid) -> Result<()>;

    /// Releases the lease and redelivers at `run_at` with one more attempt counted.
    async fn retry(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()>;

    /// Releases the lease and moves the job to its next occurrence with a fresh attempt count.
    async fn reschedule(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<()>;
}
