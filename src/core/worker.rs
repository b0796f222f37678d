use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::error::{Result, SyncError};
use crate::core::orchestrator::SyncOrchestrator;
use crate::core::queue::JobQueue;
use crate::core::schedule::ScheduleRegistry;
use crate::core::store::DatasourceStore;
use crate::models::{Job, JobKind, NewJob};

const MAX_BACKOFF: Duration = Duration::from_secs(3600);
const DRAIN_BATCH: usize = 1000;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub lease: Duration,
    pub limit_check_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: 4,
            poll_interval: Duration::from_millis(1000),
            max_attempts: 5,
            backoff_base: Duration::from_secs(10),
            lease: Duration::from_secs(300),
            limit_check_interval: Duration::from_secs(3600),
        }
    }
}

impl WorkerSettings {
    /// Exponential backoff for the given number of failed attempts, plus jitter.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exp = attempts.clamp(0, 16) as u32;
        let delay = self
            .backoff_base
            .checked_mul(1u32 << exp)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF);
        let jitter_ms = (self.backoff_base.as_millis() as u64 / 4).max(1);
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

enum Step {
    /// Job finished, remove it.
    Done,
    /// Job already moved to its next occurrence or removed.
    Rearmed,
}

/// Drains the job queue. Several workers may share one queue; leases keep a
/// job with a single worker at a time.
#[derive(Clone)]
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn DatasourceStore>,
    orchestrator: Arc<SyncOrchestrator>,
    schedules: Arc<ScheduleRegistry>,
    settings: Arc<WorkerSettings>,
    permits: Arc<Semaphore>,
    processed: Arc<AtomicU64>,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn DatasourceStore>,
        orchestrator: Arc<SyncOrchestrator>,
        schedules: Arc<ScheduleRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        let concurrency = settings.concurrency.max(1);
        Self {
            queue,
            store,
            orchestrator,
            schedules,
            settings: Arc::new(settings),
            permits: Arc::new(Semaphore::new(concurrency)),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn jobs_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Seeds the periodic limit check unless one is already queued.
    pub async fn ensure_limit_check(&self) -> Result<()> {
        if !self.queue.has_pending(JobKind::VectorLimitCheck).await? {
            self.queue
                .enqueue(NewJob::global(JobKind::VectorLimitCheck, Utc::now()))
                .await?;
            info!("Scheduled vector limit check");
        }
        Ok(())
    }

    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            worker_id = %self.settings.worker_id,
            concurrency = self.settings.concurrency,
            "Job worker started"
        );
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("Error polling job queue: {}", e);
                    }
                }
            }
        }

        // Wait for in-flight jobs before returning.
        let total = self.settings.concurrency.max(1) as u32;
        let _ = self.permits.acquire_many(total).await;
        info!(processed = self.jobs_processed(), "Job worker stopped");
    }

    /// Leases as many due jobs as there are free slots and runs them in the background.
    pub async fn poll_once(&self) -> Result<usize> {
        let available = self.permits.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let jobs = self
            .queue
            .lease(&self.settings.worker_id, available, self.settings.lease, Utc::now())
            .await?;
        let leased = jobs.len();

        for job in jobs {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SyncError::Store(format!("worker semaphore closed: {}", e)))?;
            let worker = self.clone();
            tokio::spawn(async move {
                worker.process(job).await;
                drop(permit);
            });
        }
        Ok(leased)
    }

    /// Runs every currently due job to completion on the calling task.
    pub async fn run_due_jobs(&self) -> Result<usize> {
        let jobs = self
            .queue
            .lease(&self.settings.worker_id, DRAIN_BATCH, self.settings.lease, Utc::now())
            .await?;
        let count = jobs.len();
        for job in jobs {
            self.process(job).await;
        }
        Ok(count)
    }

    pub async fn process(&self, job: Job) {
        debug!(job_id = %job.id, kind = %job.kind, attempts = job.attempts, "Processing job");

        match self.execute(&job).await {
            Ok(Step::Done) => {
                if let Err(e) = self.queue.ack(job.id).await {
                    error!(job_id = %job.id, "Failed to ack job: {}", e);
                }
            }
            Ok(Step::Rearmed) => {}
            Err(e) => self.handle_failure(&job, e).await,
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    async fn execute(&self, job: &Job) -> Result<Step> {
        match job.kind {
            JobKind::VectorLimitCheck => {
                // Placeholder: usage limits are not enforced yet.
                let interval = chrono::Duration::from_std(self.settings.limit_check_interval)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                self.queue.reschedule(job.id, Utc::now() + interval).await?;
                debug!("Vector limit check done");
                Ok(Step::Rearmed)
            }
            JobKind::ScheduledSync => self.run_scheduled_sync(job).await,
            JobKind::PurgeDatasource => {
                if let Some(id) = job.datasource_id {
                    self.orchestrator.purge_datasource(id).await?;
                }
                Ok(Step::Done)
            }
            JobKind::ForceResyncAll => {
                self.orchestrator.force_resync_all().await?;
                Ok(Step::Done)
            }
        }
    }

    async fn run_scheduled_sync(&self, job: &Job) -> Result<Step> {
        let Some(id) = job.datasource_id else {
            warn!(job_id = %job.id, "Scheduled sync without datasource, dropping");
            return Ok(Step::Done);
        };

        match self.store.get(id).await? {
            Some(ds) if !ds.is_deleted() && ds.schedule.is_recurring() => {}
            _ => return Ok(Step::Done),
        }

        match self.orchestrator.trigger_scheduled_sync(id).await {
            Ok(accepted) => info!(datasource_id = %id, job_token = %accepted.job_token, "Scheduled sync started"),
            Err(SyncError::ConflictingOperation(reason)) => {
                info!(datasource_id = %id, "Skipping scheduled sync: {}", reason)
            }
            Err(SyncError::NotFound(_)) => return Ok(Step::Done),
            Err(e) => return Err(e),
        }

        self.rearm(job, id).await?;
        Ok(Step::Rearmed)
    }

    /// Moves the trigger to its next occurrence, unless the schedule was
    /// replaced while this job ran.
    async fn rearm(&self, job: &Job, id: Uuid) -> Result<()> {
        let _guard = self.schedules.lock(id).await;

        let still_registered = self
            .queue
            .scheduled_triggers(id)
            .await?
            .iter()
            .any(|t| t.id == job.id);
        if !still_registered {
            return Ok(());
        }

        let Some(ds) = self.store.get(id).await?.filter(|ds| !ds.is_deleted()) else {
            self.queue.ack(job.id).await?;
            return Ok(());
        };
        let next_run = self.schedules.rearm(job, &ds.schedule, Utc::now()).await?;
        self.orchestrator.record_next_run(id, next_run).await?;
        Ok(())
    }

    async fn handle_failure(&self, job: &Job, e: SyncError) {
        let attempt = job.attempts + 1;
        if e.is_retryable() && attempt < self.settings.max_attempts {
            let delay = self.settings.backoff(job.attempts);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
            warn!(
                job_id = %job.id,
                kind = %job.kind,
                attempt,
                retry_in_secs = delay.as_secs(),
                "Job failed, retrying: {}",
                e
            );
            if let Err(retry_err) = self.queue.retry(job.id, run_at, &e.to_string()).await {
                error!(job_id = %job.id, "Failed to schedule retry: {}", retry_err);
            }
            return;
        }

        error!(job_id = %job.id, kind = %job.kind, attempt, "Job failed permanently: {}", e);

        if let (JobKind::ScheduledSync, Some(id)) = (job.kind, job.datasource_id) {
            if let Err(mark_err) = self.orchestrator.record_sync_failure(id, &e.to_string()).await {
                error!(datasource_id = %id, "Failed to record sync failure: {}", mark_err);
            }
            // The recurring trigger outlives a failed occurrence.
            if let Err(rearm_err) = self.rearm(job, id).await {
                error!(datasource_id = %id, "Failed to rearm schedule: {}", rearm_err);
            }
            return;
        }

        if let Err(ack_err) = self.queue.ack(job.id).await {
            error!(job_id = %job.id, "Failed to drop failed job: {}", ack_err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_capped() {
        let settings = WorkerSettings {
            backoff_base: Duration::from_secs(10),
            ..WorkerSettings::default()
        };
        let first = settings.backoff(0);
        assert!(first >= Duration::from_secs(10) && first < Duration::from_millis(12_500));
        let third = settings.backoff(2);
        assert!(third >= Duration::from_secs(40) && third < Duration::from_millis(42_500));
        assert!(settings.backoff(30) <= MAX_BACKOFF + Duration::from_millis(2_500));
    }
}
