use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Sent by the connector runner when a sync run finished loading records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSuccessfulPayload {
    /// Job token issued by `start_sync`.
    pub job_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Cumulative per-stream record counts for the run.
    #[serde(default)]
    pub record_counts: BTreeMap<String, u64>,
}

/// Sent by the embedding pipeline once synced records were vectorized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedSuccessfulPayload {
    pub datasource_id: Uuid,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub record_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Counts stored and, for sync events, the terminal transition applied.
    Applied,
    /// Token already applied; counts re-set without a transition.
    Duplicate,
    /// No matching (live) datasource, or nothing to apply in its state.
    Discarded,
}
