pub mod calculator;

pub use calculator::{next_run_after, validate};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::queue::JobQueue;
use crate::models::{Job, Schedule};

/// Keeps at most one recurring trigger per datasource in the job queue.
///
/// Registration for one datasource is serialized in-process; the queue swap
/// itself is atomic, so concurrent processes still converge on one trigger.
pub struct ScheduleRegistry {
    queue: Arc<dyn JobQueue>,
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ScheduleRegistry {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, datasource_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = match self.locks.lock() {
            Ok(mut locks) => locks.entry(datasource_id).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(datasource_id).or_default().clone(),
        };
        lock.lock_owned().await
    }

    /// Replaces the datasource's trigger with one for `schedule`.
    pub async fn register(
        &self,
        datasource_id: Uuid,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let _guard = self.lock(datasource_id).await;
        self.replace_locked(datasource_id, schedule, now).await
    }

    /// Same as [`register`](Self::register) for callers already holding [`lock`](Self::lock).
    pub async fn replace_locked(
        &self,
        datasource_id: Uuid,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let next_run = calculator::next_run_after(schedule, now)?;
        self.queue.replace_schedule(datasource_id, next_run).await?;
        match next_run {
            Some(at) => info!(datasource_id = %datasource_id, next_run_at = %at, "Schedule registered"),
            None => debug!(datasource_id = %datasource_id, "Manual schedule, no trigger registered"),
        }
        Ok(next_run)
    }

    pub async fn cancel(&self, datasource_id: Uuid) -> Result<()> {
        {
            let _guard = self.lock(datasource_id).await;
            self.queue.replace_schedule(datasource_id, None).await?;
        }
        match self.locks.lock() {
            Ok(mut locks) => locks.remove(&datasource_id),
            Err(poisoned) => poisoned.into_inner().remove(&datasource_id),
        };
        Ok(())
    }

    /// Moves a fired trigger to its next occurrence, or drops it when the
    /// schedule no longer recurs.
    pub async fn rearm(&self, job: &Job, schedule: &Schedule, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let next_run = calculator::next_run_after(schedule, now)?;
        match next_run {
            Some(at) => self.queue.reschedule(job.id, at).await?,
            None => self.queue.ack(job.id).await?,
        }
        Ok(next_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::MemoryJobQueue;
    use crate::models::TimeUnit;

    #[tokio::test]
    async fn concurrent_registrations_leave_one_trigger() {
        let queue = Arc::new(MemoryJobQueue::new());
        let registry = Arc::new(ScheduleRegistry::new(queue.clone()));
        let ds = Uuid::new_v4();
        let now = Utc::now();

        let mut handles = Vec::new();
        for magnitude in 1..=8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(
                        ds,
                        &Schedule::Interval {
                            unit: TimeUnit::Hours,
                            magnitude,
                        },
                        now,
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(queue.scheduled_triggers(ds).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn switching_to_manual_drops_the_trigger() {
        let queue = Arc::new(MemoryJobQueue::new());
        let registry = ScheduleRegistry::new(queue.clone());
        let ds = Uuid::new_v4();
        let now = Utc::now();

        let cron = Schedule::Cron {
            expression: "0 * * * *".into(),
            timezone: "UTC".into(),
        };
        assert!(registry.register(ds, &cron, now).await.unwrap().is_some());
        assert!(registry.register(ds, &Schedule::Manual, now).await.unwrap().is_none());
        assert!(queue.scheduled_triggers(ds).await.unwrap().is_empty());
    }
}
