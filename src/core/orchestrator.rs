use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::collaborators::{
    AllowAllAuthorizer, Authorizer, Capability, LogNotifier, Notification, NotificationKind,
    Notifier, Principal, TeamQuota, UsageLimits,
};
use crate::core::connectors::{ConnectorCatalog, SyncRunRequest};
use crate::core::error::{Result, SyncError};
use crate::core::queue::JobQueue;
use crate::core::schedule::{self, ScheduleRegistry};
use crate::core::store::{modify, DatasourceStore, Update};
use crate::models::{
    Datasource, DatasourceStatus, JobKind, NewJob, Schedule, StreamCatalog, TeamRef,
};

pub const CANCELLED_REASON: &str = "Cancelled";

#[derive(Debug, Clone, Deserialize)]
pub struct StageRequest {
    pub team_id: Uuid,
    pub org_id: Uuid,
    pub connector_type_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamSelection {
    pub streams: Vec<String>,
    #[serde(default)]
    pub fields_map: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAccepted {
    pub datasource_id: Uuid,
    pub job_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    NotRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub attempted: usize,
    pub started: usize,
    pub failed: usize,
}

/// Drives datasources through their lifecycle. All status changes outside
/// webhook ingestion happen here.
pub struct SyncOrchestrator {
    store: Arc<dyn DatasourceStore>,
    catalog: Arc<ConnectorCatalog>,
    schedules: Arc<ScheduleRegistry>,
    queue: Arc<dyn JobQueue>,
    authorizer: Arc<dyn Authorizer>,
    limits: Arc<dyn UsageLimits>,
    notifier: Arc<dyn Notifier>,
    purge_grace: Duration,
}

fn run_wanted(ds: &Datasource) -> bool {
    ds.status == DatasourceStatus::Syncing && !ds.is_deleted()
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn DatasourceStore>,
        catalog: Arc<ConnectorCatalog>,
        schedules: Arc<ScheduleRegistry>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            limits: Arc::new(TeamQuota::new(store.clone(), None)),
            store,
            catalog,
            schedules,
            queue,
            authorizer: Arc::new(AllowAllAuthorizer),
            notifier: Arc::new(LogNotifier),
            purge_grace: Duration::from_secs(300),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_limits(mut self, limits: Arc<dyn UsageLimits>) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_purge_grace(mut self, purge_grace: Duration) -> Self {
        self.purge_grace = purge_grace;
        self
    }

    async fn authorize(&self, principal: &Principal, team_id: Uuid, capability: Capability) -> Result<()> {
        if *principal == Principal::System {
            return Ok(());
        }
        if self.authorizer.has_capability(principal, team_id, capability).await? {
            Ok(())
        } else {
            Err(SyncError::Forbidden(format!(
                "{} lacks {} on team {}",
                principal,
                capability.as_str(),
                team_id
            )))
        }
    }

    async fn load(&self, id: Uuid) -> Result<Datasource> {
        match self.store.get(id).await? {
            Some(ds) if !ds.is_deleted() => Ok(ds),
            _ => Err(SyncError::NotFound(id)),
        }
    }

    async fn notify(&self, ds: &Datasource, kind: NotificationKind, message: String) {
        self.notifier
            .notify(Notification {
                team_id: ds.team_id,
                datasource_id: ds.id,
                kind,
                message,
            })
            .await;
    }

    pub async fn get_datasource(&self, principal: &Principal, id: Uuid) -> Result<Datasource> {
        let ds = self.load(id).await?;
        self.authorize(principal, ds.team_id, Capability::ViewDatasource)
            .await?;
        Ok(ds)
    }

    pub async fn list_datasources(&self, principal: &Principal, team_id: Uuid) -> Result<Vec<Datasource>> {
        self.authorize(principal, team_id, Capability::ViewDatasource)
            .await?;
        self.store.list_for_team(team_id).await
    }

    pub async fn stage_datasource(&self, principal: &Principal, request: StageRequest) -> Result<Datasource> {
        let connector_type_id = request.connector_type_id.trim().to_string();
        if connector_type_id.is_empty() {
            return Err(SyncError::InvalidRequest("connector_type_id is required".to_string()));
        }

        self.authorize(principal, request.team_id, Capability::CreateDatasource)
            .await?;
        if !self.limits.may_add_datasource(request.team_id).await? {
            return Err(SyncError::LimitReached(request.team_id));
        }

        let connector_name = self
            .catalog
            .list_connector_types_or_empty()
            .await
            .into_iter()
            .find(|t| t.id == connector_type_id)
            .map(|t| t.name)
            .unwrap_or_else(|| connector_type_id.clone());

        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| connector_name.clone());

        let ds = Datasource::staged(
            TeamRef {
                team_id: request.team_id,
                org_id: request.org_id,
            },
            name,
            connector_type_id,
            connector_name,
            Utc::now(),
        );
        self.store.insert(&ds).await?;

        info!(
            datasource_id = %ds.id,
            team_id = %ds.team_id,
            connector_type_id = %ds.connector_type_id,
            "Datasource staged"
        );
        Ok(ds)
    }

    /// Submits connector configuration and discovers its streams.
    pub async fn test_configuration(&self, principal: &Principal, id: Uuid, config: Value) -> Result<StreamCatalog> {
        let ds = self.load(id).await?;
        self.authorize(principal, ds.team_id, Capability::EditDatasource)
            .await?;

        let now = Utc::now();
        let (ds, prior) = modify(&*self.store, id, |ds| {
            if ds.is_deleted() {
                return Err(SyncError::NotFound(id));
            }
            match ds.status {
                DatasourceStatus::Syncing => {
                    return Err(SyncError::ConflictingOperation(
                        "configuration cannot change while a sync is running".to_string(),
                    ))
                }
                DatasourceStatus::Testing => {
                    return Err(SyncError::ConflictingOperation(
                        "a connection test is already in progress".to_string(),
                    ))
                }
                _ => {}
            }
            if ds.has_connector_binding() {
                return Err(SyncError::ConflictingOperation(
                    "connector binding cannot change after a successful test".to_string(),
                ));
            }
            let prior = ds.status;
            ds.connector_config = Some(config.clone());
            ds.failure_reason = None;
            ds.set_status(DatasourceStatus::Testing, now);
            Ok(Update::Save(prior))
        })
        .await?;

        info!(datasource_id = %id, connector_type_id = %ds.connector_type_id, "Testing connection");

        match self
            .catalog
            .test_and_discover(&ds.connector_type_id, &config)
            .await
        {
            Ok(discovery) => {
                let catalog = discovery.catalog.clone();
                modify(&*self.store, id, |ds| {
                    if ds.status != DatasourceStatus::Testing {
                        return Ok(Update::Keep(()));
                    }
                    ds.stream_catalog = Some(discovery.catalog.clone());
                    ds.connection_token = Some(discovery.connection_token.clone());
                    ds.set_status(DatasourceStatus::Discovered, Utc::now());
                    Ok(Update::Save(()))
                })
                .await?;
                info!(datasource_id = %id, streams = catalog.streams.len(), "Streams discovered");
                Ok(catalog)
            }
            Err(SyncError::ConnectionTestFailed(reason)) => {
                modify(&*self.store, id, |ds| {
                    if ds.status != DatasourceStatus::Testing {
                        return Ok(Update::Keep(()));
                    }
                    ds.failure_reason = Some(reason.clone());
                    ds.set_status(DatasourceStatus::Failed, Utc::now());
                    Ok(Update::Save(()))
                })
                .await?;
                warn!(datasource_id = %id, "Connection test rejected: {}", reason);
                Err(SyncError::ConnectionTestFailed(reason))
            }
            Err(e) => {
                modify(&*self.store, id, |ds| {
                    if ds.status != DatasourceStatus::Testing {
                        return Ok(Update::Keep(()));
                    }
                    ds.set_status(prior, Utc::now());
                    Ok(Update::Save(()))
                })
                .await?;
                warn!(datasource_id = %id, "Connection test could not run: {}", e);
                Err(e)
            }
        }
    }

    pub async fn select_streams(&self, principal: &Principal, id: Uuid, selection: StreamSelection) -> Result<Datasource> {
        let ds = self.load(id).await?;
        self.authorize(principal, ds.team_id, Capability::EditDatasource)
            .await?;

        let (ds, ()) = modify(&*self.store, id, |ds| {
            if ds.is_deleted() {
                return Err(SyncError::NotFound(id));
            }
            if ds.status == DatasourceStatus::Syncing {
                return Err(SyncError::ConflictingOperation(
                    "stream selection cannot change while a sync is running".to_string(),
                ));
            }
            let Some(catalog) = &ds.stream_catalog else {
                return Err(SyncError::ConflictingOperation(
                    "streams can only be selected after a successful connection test".to_string(),
                ));
            };
            catalog
                .validate_selection(&selection.streams, &selection.fields_map)
                .map_err(SyncError::InvalidSelection)?;

            ds.selected_streams = selection.streams.clone();
            ds.selected_fields_map = selection.fields_map.clone();
            if ds.status == DatasourceStatus::Discovered {
                ds.set_status(DatasourceStatus::Configured, Utc::now());
            }
            Ok(Update::Save(()))
        })
        .await?;

        info!(datasource_id = %id, streams = ?ds.selected_streams, "Streams selected");
        Ok(ds)
    }

    pub async fn set_schedule(&self, principal: &Principal, id: Uuid, schedule: Schedule) -> Result<Datasource> {
        let ds = self.load(id).await?;
        self.authorize(principal, ds.team_id, Capability::EditDatasource)
            .await?;
        schedule::validate(&schedule)?;

        let _guard = self.schedules.lock(id).await;
        let now = Utc::now();
        let next_run_at = schedule::next_run_after(&schedule, now)?;

        let (ds, ()) = modify(&*self.store, id, |ds| {
            if ds.is_deleted() {
                return Err(SyncError::NotFound(id));
            }
            if ds.status == DatasourceStatus::Syncing {
                return Err(SyncError::ConflictingOperation(
                    "schedule cannot change while a sync is running".to_string(),
                ));
            }
            if ds.selected_streams.is_empty() {
                return Err(SyncError::ConflictingOperation(
                    "select streams before scheduling".to_string(),
                ));
            }
            ds.schedule = schedule.clone();
            ds.next_run_at = next_run_at;
            if ds.status == DatasourceStatus::Configured {
                ds.set_status(DatasourceStatus::Scheduled, now);
            }
            Ok(Update::Save(()))
        })
        .await?;

        self.schedules.replace_locked(id, &schedule, now).await?;
        Ok(ds)
    }

    /// Manual sync request from a user.
    pub async fn trigger_sync(&self, principal: &Principal, id: Uuid) -> Result<SyncAccepted> {
        let ds = self.load(id).await?;
        self.authorize(principal, ds.team_id, Capability::SyncDatasource)
            .await?;
        self.start_sync(id).await
    }

    /// Sync fired by a recurring trigger.
    pub async fn trigger_scheduled_sync(&self, id: Uuid) -> Result<SyncAccepted> {
        self.start_sync(id).await
    }

    async fn start_sync(&self, id: Uuid) -> Result<SyncAccepted> {
        let now = Utc::now();
        let (claimed, prior) = modify(&*self.store, id, |ds| {
            if ds.is_deleted() {
                return Err(SyncError::NotFound(id));
            }
            if ds.status == DatasourceStatus::Syncing {
                return Err(SyncError::ConflictingOperation(
                    "a sync is already running".to_string(),
                ));
            }
            if !ds.ready_to_sync() {
                return Err(SyncError::ConflictingOperation(format!(
                    "datasource is not ready to sync (status {})",
                    ds.status
                )));
            }
            let prior = ds.status;
            ds.retire_job_token();
            ds.sync_attempt += 1;
            ds.failure_reason = None;
            ds.set_status(DatasourceStatus::Syncing, now);
            Ok(Update::Save(prior))
        })
        .await?;

        let request = SyncRunRequest {
            connection_token: claimed.connection_token.clone().unwrap_or_default(),
            streams: claimed.selected_streams.clone(),
            fields_map: claimed.selected_fields_map.clone(),
        };

        match self.catalog.start_sync(&request).await {
            Ok(job_token) => {
                let attempt = claimed.sync_attempt;
                let (saved, (still_wanted, displaced)) = modify(&*self.store, id, |ds| {
                    if ds.sync_attempt != attempt {
                        // A newer run owns the record.
                        ds.retire_token(job_token.clone());
                        return Ok(Update::Save((false, None)));
                    }
                    match ds.job_token.clone() {
                        // Already matched by its own success webhook.
                        Some(current) if current == job_token => Ok(Update::Keep((true, None))),
                        Some(stale) => {
                            // Adopted from a success that did not belong to this run.
                            if ds.status == DatasourceStatus::Synced
                                && ds.last_synced_token.as_deref() == Some(stale.as_str())
                            {
                                ds.set_status(DatasourceStatus::Syncing, Utc::now());
                            }
                            ds.retire_token(stale.clone());
                            ds.job_token = Some(job_token.clone());
                            Ok(Update::Save((run_wanted(ds), Some(stale))))
                        }
                        None => {
                            // Recorded even after a cancel so a late success can still be matched.
                            ds.job_token = Some(job_token.clone());
                            Ok(Update::Save((run_wanted(ds), None)))
                        }
                    }
                })
                .await?;
                if let Some(stale) = displaced {
                    warn!(datasource_id = %id, job_token = %job_token, stale_token = %stale, "Replaced job token adopted from an earlier run");
                }
                if !still_wanted {
                    // Cancelled, deleted or superseded before the runner answered.
                    self.catalog.cancel_run_detached(job_token.clone());
                }
                info!(datasource_id = %id, job_token = %job_token, status = %saved.status, "Sync started");
                Ok(SyncAccepted {
                    datasource_id: id,
                    job_token,
                })
            }
            Err(e) if e.is_retryable() => {
                modify(&*self.store, id, |ds| {
                    if ds.sync_attempt != claimed.sync_attempt
                        || ds.status != DatasourceStatus::Syncing
                        || ds.job_token.is_some()
                    {
                        return Ok(Update::Keep(()));
                    }
                    ds.set_status(prior, Utc::now());
                    Ok(Update::Save(()))
                })
                .await?;
                warn!(datasource_id = %id, "Sync could not start, state restored: {}", e);
                Err(e)
            }
            Err(e) => {
                let reason = e.to_string();
                let (saved, failed) = modify(&*self.store, id, |ds| {
                    if ds.sync_attempt != claimed.sync_attempt
                        || ds.status != DatasourceStatus::Syncing
                        || ds.job_token.is_some()
                    {
                        return Ok(Update::Keep(false));
                    }
                    ds.failure_reason = Some(reason.clone());
                    ds.set_status(DatasourceStatus::Failed, Utc::now());
                    Ok(Update::Save(true))
                })
                .await?;
                error!(datasource_id = %id, "Sync rejected by connector runner: {}", e);
                if failed {
                    self.notify(&saved, NotificationKind::SyncFailed, format!("Sync of '{}' failed: {}", saved.name, reason))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Best-effort cancel: marks the record FAILED right away and asks the
    /// runner to abort without waiting.
    pub async fn cancel_sync(&self, principal: &Principal, id: Uuid) -> Result<CancelOutcome> {
        let ds = self.load(id).await?;
        self.authorize(principal, ds.team_id, Capability::SyncDatasource)
            .await?;

        let (saved, outcome) = modify(&*self.store, id, |ds| {
            if ds.status != DatasourceStatus::Syncing {
                return Ok(Update::Keep(CancelOutcome::NotRunning));
            }
            ds.failure_reason = Some(CANCELLED_REASON.to_string());
            ds.set_status(DatasourceStatus::Failed, Utc::now());
            Ok(Update::Save(CancelOutcome::Cancelled))
        })
        .await?;

        if outcome == CancelOutcome::Cancelled {
            info!(datasource_id = %id, job_token = ?saved.job_token, "Sync cancelled");
            if let Some(token) = saved.job_token.clone() {
                self.catalog.cancel_run_detached(token);
            }
        }
        Ok(outcome)
    }

    pub async fn delete_datasource(&self, principal: &Principal, id: Uuid) -> Result<()> {
        let ds = self.load(id).await?;
        self.authorize(principal, ds.team_id, Capability::DeleteDatasource)
            .await?;

        let now = Utc::now();
        let (saved, was_syncing) = modify(&*self.store, id, |ds| {
            if ds.is_deleted() {
                return Err(SyncError::NotFound(id));
            }
            ds.deleted_at = Some(now);
            Ok(Update::Save(ds.status == DatasourceStatus::Syncing))
        })
        .await?;

        self.schedules.cancel(id).await?;
        self.queue.cancel_for_datasource(id).await?;

        if was_syncing {
            if let Some(token) = saved.job_token.clone() {
                self.catalog.cancel_run_detached(token);
            }
            let grace = chrono::Duration::from_std(self.purge_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
            self.queue
                .enqueue(NewJob::for_datasource(JobKind::PurgeDatasource, id, now + grace))
                .await?;
            info!(datasource_id = %id, "Datasource marked for deletion, purge deferred until run ends");
        } else {
            self.store.purge(id).await?;
            info!(datasource_id = %id, "Datasource deleted");
        }
        Ok(())
    }

    /// Removes a record previously marked for deletion.
    pub async fn purge_datasource(&self, id: Uuid) -> Result<()> {
        match self.store.get(id).await? {
            Some(ds) if ds.is_deleted() => {
                self.store.purge(id).await?;
                info!(datasource_id = %id, "Datasource purged");
            }
            Some(_) => warn!(datasource_id = %id, "Refusing to purge a live datasource"),
            None => {}
        }
        Ok(())
    }

    /// Marks a datasource FAILED after its scheduled sync exhausted retries.
    pub async fn record_sync_failure(&self, id: Uuid, reason: &str) -> Result<()> {
        let (saved, failed) = modify(&*self.store, id, |ds| {
            if ds.is_deleted() || ds.status == DatasourceStatus::Syncing || !ds.ready_to_sync() {
                return Ok(Update::Keep(false));
            }
            if ds.status == DatasourceStatus::Failed && ds.failure_reason.as_deref() == Some(reason) {
                return Ok(Update::Keep(false));
            }
            ds.failure_reason = Some(reason.to_string());
            ds.set_status(DatasourceStatus::Failed, Utc::now());
            Ok(Update::Save(true))
        })
        .await?;

        if failed {
            self.notify(
                &saved,
                NotificationKind::SyncFailed,
                format!("Scheduled sync of '{}' failed: {}", saved.name, reason),
            )
            .await;
        }
        Ok(())
    }

    pub async fn record_next_run(&self, id: Uuid, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        modify(&*self.store, id, |ds| {
            if ds.is_deleted() || ds.next_run_at == next_run_at {
                return Ok(Update::Keep(()));
            }
            ds.next_run_at = next_run_at;
            Ok(Update::Save(()))
        })
        .await?;
        Ok(())
    }

    /// Triggers a sync on every datasource with a live connector binding.
    /// Individual failures are logged and counted, never propagated.
    pub async fn force_resync_all(&self) -> Result<ResyncReport> {
        let datasources = self.store.list_with_connection().await?;
        let mut report = ResyncReport::default();

        for ds in datasources {
            report.attempted += 1;
            match self.start_sync(ds.id).await {
                Ok(accepted) => {
                    report.started += 1;
                    info!(datasource_id = %ds.id, job_token = %accepted.job_token, "Resync started");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(datasource_id = %ds.id, "Resync skipped: {}", e);
                }
            }
        }

        info!(
            attempted = report.attempted,
            started = report.started,
            failed = report.failed,
            "Force resync finished"
        );
        Ok(report)
    }
}
