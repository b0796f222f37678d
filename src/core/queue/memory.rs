use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::JobQueue;
use crate::core::error::{Result, SyncError};
use crate::models::{Job, JobKind, NewJob};

struct Entry {
    job: Job,
    locked_by: Option<String>,
    locked_until: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.job.run_at <= now && self.locked_until.map_or(true, |until| until <= now)
    }

    fn release(&mut self) {
        self.locked_by = None;
        self.locked_until = None;
    }
}

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<Uuid, Entry>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Snapshot of every queued job ordered by due time.
    pub async fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().await.values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.run_at);
        jobs
    }

    fn new_entry(job: NewJob) -> Entry {
        Entry {
            job: Job {
                id: Uuid::new_v4(),
                kind: job.kind,
                datasource_id: job.datasource_id,
                run_at: job.run_at,
                attempts: 0,
                last_error: None,
                created_at: Utc::now(),
            },
            locked_by: None,
            locked_until: None,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        let mut jobs = self.jobs.lock().await;
        if job.kind == JobKind::ScheduledSync {
            let duplicate = jobs
                .values()
                .any(|e| e.job.kind == JobKind::ScheduledSync && e.job.datasource_id == job.datasource_id);
            if duplicate {
                return Err(SyncError::Store(
                    "datasource already has a scheduled trigger".to_string(),
                ));
            }
        }
        let entry = Self::new_entry(job);
        let id = entry.job.id;
        jobs.insert(id, entry);
        Ok(id)
    }

    async fn replace_schedule(&self, datasource_id: Uuid, run_at: Option<DateTime<Utc>>) -> Result<Option<Uuid>> {
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|_, e| !(e.job.kind == JobKind::ScheduledSync && e.job.datasource_id == Some(datasource_id)));

        Ok(run_at.map(|run_at| {
            let entry = Self::new_entry(NewJob::for_datasource(JobKind::ScheduledSync, datasource_id, run_at));
            let id = entry.job.id;
            jobs.insert(id, entry);
            id
        }))
    }

    async fn cancel_for_datasource(&self, datasource_id: Uuid) -> Result<u64> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, e| e.job.datasource_id != Some(datasource_id));
        Ok((before - jobs.len()) as u64)
    }

    async fn scheduled_triggers(&self, datasource_id: Uuid) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|e| e.job.kind == JobKind::ScheduledSync && e.job.datasource_id == Some(datasource_id))
            .map(|e| e.job.clone())
            .collect())
    }

    async fn has_pending(&self, kind: JobKind) -> Result<bool> {
        Ok(self.jobs.lock().await.values().any(|e| e.job.kind == kind))
    }

    async fn lease(&self, worker_id: &str, limit: usize, lease: Duration, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| SyncError::Store(format!("invalid lease duration: {}", e)))?;
        let mut jobs = self.jobs.lock().await;

        let mut due: Vec<&mut Entry> = jobs.values_mut().filter(|e| e.is_available(now)).collect();
        due.sort_by_key(|e| e.job.run_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|entry| {
                entry.locked_by = Some(worker_id.to_string());
                entry.locked_until = Some(now + lease);
                entry.job.clone()
            })
            .collect())
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        self.jobs.lock().await.remove(&job_id);
        Ok(())
    }

    async fn retry(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        if let Some(entry) = self.jobs.lock().await.get_mut(&job_id) {
            entry.job.attempts += 1;
            entry.job.run_at = run_at;
            entry.job.last_error = Some(error.to_string());
            entry.release();
        }
        Ok(())
    }

    async fn reschedule(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.jobs.lock().await.get_mut(&job_id) {
            entry.job.attempts = 0;
            entry.job.run_at = run_at;
            entry.job.last_error = None;
            entry.release();
        }
        Ok(())
    }
}
