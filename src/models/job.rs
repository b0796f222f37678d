use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Periodic vector-store limit check. Currently a placeholder that only reschedules itself.
    VectorLimitCheck,
    /// Recurring trigger for one datasource's schedule.
    ScheduledSync,
    /// Deferred removal of a datasource deleted mid-sync.
    PurgeDatasource,
    /// Administrative re-sync of every bound datasource.
    ForceResyncAll,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::VectorLimitCheck => "vector_limit_check",
            JobKind::ScheduledSync => "scheduled_sync",
            JobKind::PurgeDatasource => "purge_datasource",
            JobKind::ForceResyncAll => "force_resync_all",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector_limit_check" => Ok(JobKind::VectorLimitCheck),
            "scheduled_sync" => Ok(JobKind::ScheduledSync),
            "purge_datasource" => Ok(JobKind::PurgeDatasource),
            "force_resync_all" => Ok(JobKind::ForceResyncAll),
            other => Err(format!("unknown job kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub kind: JobKind,
    pub datasource_id: Option<Uuid>,
    pub run_at: DateTime<Utc>,
}

impl NewJob {
    pub fn global(kind: JobKind, run_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            datasource_id: None,
            run_at,
        }
    }

    pub fn for_datasource(kind: JobKind, datasource_id: Uuid, run_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            datasource_id: Some(datasource_id),
            run_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub datasource_id: Option<Uuid>,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
