use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a datasource, from staging through webhook-confirmed sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceStatus {
    Staged,
    Testing,
    Discovered,
    Configured,
    Scheduled,
    Syncing,
    Synced,
    Failed,
}

impl DatasourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceStatus::Staged => "staged",
            DatasourceStatus::Testing => "testing",
            DatasourceStatus::Discovered => "discovered",
            DatasourceStatus::Configured => "configured",
            DatasourceStatus::Scheduled => "scheduled",
            DatasourceStatus::Syncing => "syncing",
            DatasourceStatus::Synced => "synced",
            DatasourceStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DatasourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatasourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staged" => Ok(DatasourceStatus::Staged),
            "testing" => Ok(DatasourceStatus::Testing),
            "discovered" => Ok(DatasourceStatus::Discovered),
            "configured" => Ok(DatasourceStatus::Configured),
            "scheduled" => Ok(DatasourceStatus::Scheduled),
            "syncing" => Ok(DatasourceStatus::Syncing),
            "synced" => Ok(DatasourceStatus::Synced),
            "failed" => Ok(DatasourceStatus::Failed),
            other => Err(format!("unknown datasource status '{}'", other)),
        }
    }
}

/// A stream exposed by a connector's discovered schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredStream {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
    /// Set for nested streams, names the stream this one hangs off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCatalog {
    pub streams: Vec<DiscoveredStream>,
}

impl StreamCatalog {
    pub fn get(&self, name: &str) -> Option<&DiscoveredStream> {
        self.streams.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.streams.iter().map(|s| s.name.as_str()).collect()
    }

    /// Checks a stream/field selection against this catalog.
    ///
    /// Every selected stream must be discovered, every field-map key must be a
    /// selected stream, every listed field must exist on its stream, and a
    /// nested stream can only be selected together with its parent.
    pub fn validate_selection(
        &self,
        streams: &[String],
        fields_map: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), String> {
        if streams.is_empty() {
            return Err("at least one stream must be selected".to_string());
        }

        let selected: BTreeSet<&str> = streams.iter().map(|s| s.as_str()).collect();
        if selected.len() != streams.len() {
            return Err("stream selection contains duplicates".to_string());
        }

        for name in streams {
            let stream = self
                .get(name)
                .ok_or_else(|| format!("stream '{}' was not discovered", name))?;
            if let Some(parent) = &stream.parent {
                if !selected.contains(parent.as_str()) {
                    return Err(format!(
                        "nested stream '{}' requires its parent stream '{}' to be selected",
                        name, parent
                    ));
                }
            }
        }

        for (stream_name, fields) in fields_map {
            if !selected.contains(stream_name.as_str()) {
                return Err(format!(
                    "field selection given for stream '{}' which is not selected",
                    stream_name
                ));
            }
            // Selected above, so the lookup cannot miss.
            let Some(stream) = self.get(stream_name) else {
                continue;
            };
            if stream.fields.is_empty() {
                continue;
            }
            for field in fields {
                if !stream.fields.iter().any(|f| f == field) {
                    return Err(format!(
                        "field '{}' does not exist on stream '{}'",
                        field, stream_name
                    ));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

/// How a datasource is kept in sync. Switching variants drops the previous
/// variant's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Manual,
    Interval {
        unit: TimeUnit,
        magnitude: u32,
    },
    Cron {
        expression: String,
        timezone: String,
    },
}

impl Schedule {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Schedule::Manual)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCount {
    #[serde(default)]
    pub synced: u64,
    #[serde(default)]
    pub embedded: u64,
}

pub type RecordCounts = BTreeMap<String, RecordCount>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Embedding has not caught up with the raw sync yet.
    Lagging,
    /// More records were embedded than synced.
    Exceeds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMismatch {
    pub stream: String,
    pub synced: u64,
    pub embedded: u64,
    pub kind: MismatchKind,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub checked_at: DateTime<Utc>,
    pub tolerance: f64,
    pub mismatches: Vec<StreamMismatch>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// True when a stream is past the lag tolerance or embedded more than it synced.
    pub fn has_violation(&self) -> bool {
        self.mismatches.iter().any(|m| !m.within_tolerance)
    }

    pub fn has_overflow(&self) -> bool {
        self.mismatches.iter().any(|m| m.kind == MismatchKind::Exceeds)
    }
}

/// Compares synced and embedded counts per stream.
///
/// `tolerance` is the fraction of synced records allowed to still be pending
/// embedding. Exceeding the synced count is never within tolerance.
pub fn reconcile(counts: &RecordCounts, tolerance: f64, now: DateTime<Utc>) -> ReconciliationReport {
    let mut mismatches = Vec::new();
    for (stream, count) in counts {
        if count.synced == count.embedded {
            continue;
        }
        let mismatch = if count.embedded > count.synced {
            StreamMismatch {
                stream: stream.clone(),
                synced: count.synced,
                embedded: count.embedded,
                kind: MismatchKind::Exceeds,
                within_tolerance: false,
            }
        } else {
            let lag = (count.synced - count.embedded) as f64 / count.synced as f64;
            StreamMismatch {
                stream: stream.clone(),
                synced: count.synced,
                embedded: count.embedded,
                kind: MismatchKind::Lagging,
                within_tolerance: lag <= tolerance,
            }
        };
        mismatches.push(mismatch);
    }

    ReconciliationReport {
        checked_at: now,
        tolerance,
        mismatches,
    }
}

const MAX_RETIRED_JOB_TOKENS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
    pub team_id: Uuid,
    pub org_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub id: Uuid,
    pub team_id: Uuid,
    pub org_id: Uuid,
    pub name: String,

    pub connector_type_id: String,
    pub connector_name: String,
    pub connector_config: Option<Value>,

    pub stream_catalog: Option<StreamCatalog>,
    pub selected_streams: Vec<String>,
    pub selected_fields_map: BTreeMap<String, Vec<String>>,

    pub schedule: Schedule,
    pub next_run_at: Option<DateTime<Utc>>,

    pub status: DatasourceStatus,
    pub failure_reason: Option<String>,

    pub record_count: RecordCounts,
    pub reconciliation: Option<ReconciliationReport>,

    /// Issued by the connector runner when the configuration tested OK.
    pub connection_token: Option<String>,
    /// Issued by the connector runner for the current (or last) sync run.
    pub job_token: Option<String>,
    /// Job token whose sync-successful webhook has already been applied.
    pub last_synced_token: Option<String>,
    /// Tokens of earlier runs, newest last. A success for one of these never
    /// completes the current run.
    #[serde(default)]
    pub retired_job_tokens: Vec<String>,
    /// Bumped every time a run is claimed.
    #[serde(default)]
    pub sync_attempt: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,

    pub version: i64,
}

impl Datasource {
    pub fn staged(
        team: TeamRef,
        name: String,
        connector_type_id: String,
        connector_name: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id: team.team_id,
            org_id: team.org_id,
            name,
            connector_type_id,
            connector_name,
            connector_config: None,
            stream_catalog: None,
            selected_streams: Vec::new(),
            selected_fields_map: BTreeMap::new(),
            schedule: Schedule::Manual,
            next_run_at: None,
            status: DatasourceStatus::Staged,
            failure_reason: None,
            record_count: RecordCounts::new(),
            reconciliation: None,
            connection_token: None,
            job_token: None,
            last_synced_token: None,
            retired_job_tokens: Vec::new(),
            sync_attempt: 0,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
            last_synced_at: None,
            deleted_at: None,
            version: 0,
        }
    }

    /// A binding exists once a configuration test has succeeded.
    pub fn has_connector_binding(&self) -> bool {
        self.connection_token.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn set_status(&mut self, status: DatasourceStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = now;
        }
    }

    /// Can a sync run be started from the current state.
    pub fn ready_to_sync(&self) -> bool {
        self.has_connector_binding()
            && !self.selected_streams.is_empty()
            && matches!(
                self.status,
                DatasourceStatus::Scheduled | DatasourceStatus::Synced | DatasourceStatus::Failed
            )
    }

    /// Moves the current job token to the retired list and clears it.
    pub fn retire_job_token(&mut self) {
        if let Some(token) = self.job_token.take() {
            self.retire_token(token);
        }
    }

    pub fn retire_token(&mut self, token: String) {
        self.retired_job_tokens.retain(|t| *t != token);
        self.retired_job_tokens.push(token);
        let overflow = self.retired_job_tokens.len().saturating_sub(MAX_RETIRED_JOB_TOKENS);
        self.retired_job_tokens.drain(..overflow);
    }

    pub fn is_retired_token(&self, token: &str) -> bool {
        self.retired_job_tokens.iter().any(|t| t == token)
    }

    pub fn set_synced_counts(&mut self, counts: &BTreeMap<String, u64>) {
        for (stream, synced) in counts {
            self.record_count.entry(stream.clone()).or_default().synced = *synced;
        }
    }

    pub fn set_embedded_counts(&mut self, counts: &BTreeMap<String, u64>) {
        for (stream, embedded) in counts {
            self.record_count.entry(stream.clone()).or_default().embedded = *embedded;
        }
    }
}
