use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use datasource_sync::core::collaborators::{
    Authorizer, Capability, Notification, NotificationKind, Notifier, Principal,
};
use datasource_sync::core::connectors::{ConnectorCatalog, ConnectorType, MemoryConnectorRunner};
use datasource_sync::core::orchestrator::{
    CancelOutcome, StageRequest, StreamSelection, SyncOrchestrator, CANCELLED_REASON,
};
use datasource_sync::core::schedule::ScheduleRegistry;
use datasource_sync::core::queue::{JobQueue, MemoryJobQueue};
use datasource_sync::core::store::MemoryDatasourceStore;
use datasource_sync::core::{Result, SyncError};
use datasource_sync::models::{
    DatasourceStatus, DiscoveredStream, EmbedSuccessfulPayload, JobKind, MismatchKind, Schedule,
    StreamCatalog, SyncSuccessfulPayload, TimeUnit, WebhookOutcome,
};
use datasource_sync::utils::{AppState, Config};

const CSV_CONNECTOR: &str = "source-csv-http";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// Knows the team's datasources exist but grants nothing on them.
struct NoAccessAuthorizer;

#[async_trait]
impl Authorizer for NoAccessAuthorizer {
    async fn has_capability(&self, _principal: &Principal, _team_id: Uuid, _capability: Capability) -> Result<bool> {
        Ok(false)
    }
}

struct Harness {
    state: AppState,
    runner: Arc<MemoryConnectorRunner>,
    queue: Arc<MemoryJobQueue>,
    notifier: Arc<RecordingNotifier>,
    team_id: Uuid,
    user: Principal,
}

fn orders_catalog() -> StreamCatalog {
    StreamCatalog {
        streams: vec![
            DiscoveredStream {
                name: "orders".to_string(),
                fields: vec!["id".to_string(), "total".to_string(), "created_at".to_string()],
                parent: None,
            },
            DiscoveredStream {
                name: "orders_items".to_string(),
                fields: vec!["order_id".to_string(), "sku".to_string(), "qty".to_string()],
                parent: Some("orders".to_string()),
            },
        ],
    }
}

fn harness_with(config: Config) -> Harness {
    let runner = Arc::new(MemoryConnectorRunner::new().with_connector(
        ConnectorType {
            id: CSV_CONNECTOR.to_string(),
            name: "CSV over HTTP".to_string(),
            icon: None,
            connector_type: "source".to_string(),
        },
        orders_catalog(),
    ));
    let queue = Arc::new(MemoryJobQueue::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::from_parts(
        config,
        Arc::new(MemoryDatasourceStore::new()),
        queue.clone(),
        runner.clone(),
        notifier.clone(),
    );

    Harness {
        state,
        runner,
        queue,
        notifier,
        team_id: Uuid::new_v4(),
        user: Principal::Account("alice".to_string()),
    }
}

fn harness() -> Harness {
    harness_with(Config::default())
}

fn csv_config() -> serde_json::Value {
    json!({ "url": "https://files.example.com/orders.csv", "delimiter": "," })
}

fn orders_selection() -> StreamSelection {
    let mut fields_map = BTreeMap::new();
    fields_map.insert("orders".to_string(), vec!["id".to_string(), "total".to_string()]);
    StreamSelection {
        streams: vec!["orders".to_string()],
        fields_map,
    }
}

fn counts(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

impl Harness {
    async fn stage(&self) -> Uuid {
        self.state
            .orchestrator
            .stage_datasource(
                &self.user,
                StageRequest {
                    team_id: self.team_id,
                    org_id: Uuid::new_v4(),
                    connector_type_id: CSV_CONNECTOR.to_string(),
                    name: Some("Orders feed".to_string()),
                },
            )
            .await
            .unwrap()
            .id
    }

    /// Staged, tested, with `orders` selected and a manual schedule, so it is ready to sync.
    async fn configured(&self) -> Uuid {
        let id = self.stage().await;
        self.state
            .orchestrator
            .test_configuration(&self.user, id, csv_config())
            .await
            .unwrap();
        self.state
            .orchestrator
            .select_streams(&self.user, id, orders_selection())
            .await
            .unwrap();
        self.state
            .orchestrator
            .set_schedule(&self.user, id, Schedule::Manual)
            .await
            .unwrap();
        id
    }

    async fn status(&self, id: Uuid) -> DatasourceStatus {
        self.state.store.get(id).await.unwrap().unwrap().status
    }

    async fn sync_webhook(&self, job_token: &str, entries: &[(&str, u64)]) -> WebhookOutcome {
        self.state
            .webhooks
            .handle_sync_successful(SyncSuccessfulPayload {
                job_id: job_token.to_string(),
                connection_id: None,
                timestamp: Some(Utc::now()),
                record_counts: counts(entries),
            })
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_csv_datasource_full_lifecycle() {
    let h = harness();
    let id = h.stage().await;
    assert_eq!(h.status(id).await, DatasourceStatus::Staged);

    let catalog = h
        .state
        .orchestrator
        .test_configuration(&h.user, id, csv_config())
        .await
        .unwrap();
    assert_eq!(catalog.names(), vec!["orders", "orders_items"]);
    assert_eq!(h.status(id).await, DatasourceStatus::Discovered);

    let ds = h
        .state
        .orchestrator
        .select_streams(&h.user, id, orders_selection())
        .await
        .unwrap();
    assert_eq!(ds.status, DatasourceStatus::Configured);

    let ds = h
        .state
        .orchestrator
        .set_schedule(
            &h.user,
            id,
            Schedule::Cron {
                expression: "0 * * * *".to_string(),
                timezone: "UTC".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(ds.status, DatasourceStatus::Scheduled);
    assert!(ds.next_run_at.is_some());
    assert_eq!(h.queue.scheduled_triggers(id).await.unwrap().len(), 1);

    let accepted = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();
    assert_eq!(h.status(id).await, DatasourceStatus::Syncing);

    let runs = h.runner.started_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].streams, vec!["orders".to_string()]);
    assert_eq!(runs[0].fields_map["orders"], vec!["id".to_string(), "total".to_string()]);

    let outcome = h.sync_webhook(&accepted.job_token, &[("orders", 120)]).await;
    assert_eq!(outcome, WebhookOutcome::Applied);

    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Synced);
    assert_eq!(ds.record_count["orders"].synced, 120);
    assert!(ds.last_synced_at.is_some());
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::SyncSucceeded]);

    let (outcome, report) = h
        .state
        .webhooks
        .handle_embed_successful(EmbedSuccessfulPayload {
            datasource_id: id,
            timestamp: Some(Utc::now()),
            record_counts: counts(&[("orders", 118)]),
        })
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let report = report.unwrap();
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].kind, MismatchKind::Lagging);
    assert!(report.mismatches[0].within_tolerance);

    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.record_count["orders"].embedded, 118);
    assert_eq!(ds.status, DatasourceStatus::Synced);
}

#[tokio::test]
async fn test_rejected_connection_test_fails_then_recovers() {
    let h = harness();
    let id = h.stage().await;

    h.runner.reject_next_test("authentication failed");
    let err = h
        .state
        .orchestrator
        .test_configuration(&h.user, id, csv_config())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConnectionTestFailed(_)));

    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Failed);
    assert_eq!(ds.failure_reason.as_deref(), Some("authentication failed"));
    assert!(ds.connection_token.is_none());

    h.state
        .orchestrator
        .test_configuration(&h.user, id, csv_config())
        .await
        .unwrap();
    assert_eq!(h.status(id).await, DatasourceStatus::Discovered);
}

#[tokio::test]
async fn test_invalid_csv_config_is_rejected_locally() {
    let h = harness();
    let id = h.stage().await;

    let err = h
        .state
        .orchestrator
        .test_configuration(&h.user, id, json!({ "url": "ftp://files.example.com/orders.csv" }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConnectionTestFailed(_)));
    assert_eq!(h.status(id).await, DatasourceStatus::Failed);
}

#[tokio::test]
async fn test_selection_rules_are_enforced() {
    let h = harness();
    let id = h.stage().await;
    h.state
        .orchestrator
        .test_configuration(&h.user, id, csv_config())
        .await
        .unwrap();

    let mut unselected_key = orders_selection();
    unselected_key
        .fields_map
        .insert("orders_items".to_string(), vec!["sku".to_string()]);
    let err = h
        .state
        .orchestrator
        .select_streams(&h.user, id, unselected_key)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSelection(_)));

    let orphan = StreamSelection {
        streams: vec!["orders_items".to_string()],
        fields_map: BTreeMap::new(),
    };
    let err = h
        .state
        .orchestrator
        .select_streams(&h.user, id, orphan)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSelection(_)));

    assert_eq!(h.status(id).await, DatasourceStatus::Discovered);
}

#[tokio::test]
async fn test_replayed_sync_webhook_is_idempotent() {
    let h = harness();
    let id = h.configured().await;
    let accepted = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();

    assert_eq!(h.sync_webhook(&accepted.job_token, &[("orders", 40)]).await, WebhookOutcome::Applied);
    assert_eq!(h.sync_webhook(&accepted.job_token, &[("orders", 40)]).await, WebhookOutcome::Duplicate);

    assert_eq!(h.status(id).await, DatasourceStatus::Synced);
    assert_eq!(h.notifier.kinds().len(), 1);
}

#[tokio::test]
async fn test_unknown_job_token_is_discarded() {
    let h = harness();
    let id = h.configured().await;

    assert_eq!(h.sync_webhook("job-does-not-exist", &[("orders", 1)]).await, WebhookOutcome::Discarded);
    assert_eq!(h.status(id).await, DatasourceStatus::Scheduled);
}

#[tokio::test]
async fn test_embed_before_sync_keeps_status() {
    let h = harness();
    let id = h.configured().await;

    let (outcome, report) = h
        .state
        .webhooks
        .handle_embed_successful(EmbedSuccessfulPayload {
            datasource_id: id,
            timestamp: None,
            record_counts: counts(&[("orders", 50)]),
        })
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);
    assert!(report.unwrap().has_overflow());

    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Scheduled);
    assert_eq!(ds.record_count["orders"].embedded, 50);
}

#[tokio::test]
async fn test_overflow_fails_synced_datasource_when_enabled() {
    let h = harness_with(Config {
        fail_on_reconciliation_overflow: true,
        ..Config::default()
    });
    let id = h.configured().await;
    let accepted = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();
    h.sync_webhook(&accepted.job_token, &[("orders", 10)]).await;

    h.state
        .webhooks
        .handle_embed_successful(EmbedSuccessfulPayload {
            datasource_id: id,
            timestamp: None,
            record_counts: counts(&[("orders", 12)]),
        })
        .await
        .unwrap();

    assert_eq!(h.status(id).await, DatasourceStatus::Failed);
    assert_eq!(
        h.notifier.kinds(),
        vec![NotificationKind::SyncSucceeded, NotificationKind::SyncFailed]
    );
}

#[tokio::test]
async fn test_rescheduling_keeps_a_single_trigger() {
    let h = harness();
    let id = h.configured().await;

    h.state
        .orchestrator
        .set_schedule(
            &h.user,
            id,
            Schedule::Cron {
                expression: "30 6 * * 1-5".to_string(),
                timezone: "America/New_York".to_string(),
            },
        )
        .await
        .unwrap();
    let ds = h
        .state
        .orchestrator
        .set_schedule(
            &h.user,
            id,
            Schedule::Interval {
                unit: TimeUnit::Hours,
                magnitude: 6,
            },
        )
        .await
        .unwrap();

    let triggers = h.queue.scheduled_triggers(id).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(Some(triggers[0].run_at), ds.next_run_at);

    h.state
        .orchestrator
        .set_schedule(&h.user, id, Schedule::Manual)
        .await
        .unwrap();
    assert!(h.queue.scheduled_triggers(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_schedule_is_rejected() {
    let h = harness();
    let id = h.configured().await;

    let err = h
        .state
        .orchestrator
        .set_schedule(
            &h.user,
            id,
            Schedule::Cron {
                expression: "0 * * * *".to_string(),
                timezone: "Mars/Olympus_Mons".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSchedule(_)));
    assert!(h.queue.scheduled_triggers(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_trigger_conflicts_while_syncing() {
    let h = harness();
    let id = h.configured().await;
    h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();

    let err = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap_err();
    assert!(matches!(err, SyncError::ConflictingOperation(_)));

    let err = h
        .state
        .orchestrator
        .select_streams(&h.user, id, orders_selection())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConflictingOperation(_)));
    assert_eq!(h.runner.started_runs().len(), 1);
}

#[tokio::test]
async fn test_late_success_overrides_cancel() {
    let h = harness();
    let id = h.configured().await;
    let accepted = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();

    let outcome = h.state.orchestrator.cancel_sync(&h.user, id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);
    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Failed);
    assert_eq!(ds.failure_reason.as_deref(), Some(CANCELLED_REASON));

    assert_eq!(
        h.state.orchestrator.cancel_sync(&h.user, id).await.unwrap(),
        CancelOutcome::NotRunning
    );

    assert_eq!(h.sync_webhook(&accepted.job_token, &[("orders", 7)]).await, WebhookOutcome::Applied);
    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Synced);
    assert!(ds.failure_reason.is_none());
}

#[tokio::test]
async fn test_cancelled_run_success_cannot_claim_next_run() {
    let h = harness();
    let id = h.configured().await;
    let first = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();
    h.state.orchestrator.cancel_sync(&h.user, id).await.unwrap();
    let connection_token = h.state.store.get(id).await.unwrap().unwrap().connection_token;

    // Hold the runner so the next run is SYNCING without a job token for a while.
    h.runner.set_delay(Duration::from_millis(500));
    let orchestrator = h.state.orchestrator.clone();
    let user = h.user.clone();
    let second = tokio::spawn(async move { orchestrator.trigger_sync(&user, id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.status(id).await, DatasourceStatus::Syncing);

    let late = h
        .state
        .webhooks
        .handle_sync_successful(SyncSuccessfulPayload {
            job_id: first.job_token.clone(),
            connection_id: connection_token,
            timestamp: Some(Utc::now()),
            record_counts: counts(&[("orders", 5)]),
        })
        .await
        .unwrap();
    assert_eq!(late, WebhookOutcome::Discarded);

    let second = second.await.unwrap().unwrap();
    assert_ne!(second.job_token, first.job_token);
    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Syncing);
    assert_eq!(ds.job_token.as_deref(), Some(second.job_token.as_str()));
    assert!(ds.retired_job_tokens.contains(&first.job_token));

    assert_eq!(h.sync_webhook(&second.job_token, &[("orders", 99)]).await, WebhookOutcome::Applied);
    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Synced);
    assert_eq!(ds.record_count["orders"].synced, 99);
    assert_eq!(ds.last_synced_token.as_deref(), Some(second.job_token.as_str()));
}

#[tokio::test]
async fn test_success_before_token_is_persisted_is_applied() {
    let h = harness();
    let id = h.configured().await;
    let connection_token = h.state.store.get(id).await.unwrap().unwrap().connection_token;

    h.runner.set_delay(Duration::from_millis(300));
    let orchestrator = h.state.orchestrator.clone();
    let user = h.user.clone();
    let run = tokio::spawn(async move { orchestrator.trigger_sync(&user, id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The runner hands out job tokens in sequence after the connection token.
    let outcome = h
        .state
        .webhooks
        .handle_sync_successful(SyncSuccessfulPayload {
            job_id: "job-2".to_string(),
            connection_id: connection_token,
            timestamp: Some(Utc::now()),
            record_counts: counts(&[("orders", 8)]),
        })
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let accepted = run.await.unwrap().unwrap();
    assert_eq!(accepted.job_token, "job-2");
    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Synced);
    assert_eq!(ds.job_token.as_deref(), Some("job-2"));
    assert!(ds.retired_job_tokens.is_empty());
}

#[tokio::test]
async fn test_unavailable_runner_restores_state() {
    let h = harness();
    let id = h.configured().await;

    h.runner.set_unavailable(true);
    let err = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap_err();
    assert!(matches!(err, SyncError::UpstreamUnavailable(_)));
    assert_eq!(h.status(id).await, DatasourceStatus::Scheduled);

    h.runner.set_unavailable(false);
    h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();
    assert_eq!(h.status(id).await, DatasourceStatus::Syncing);
}

#[tokio::test]
async fn test_rejected_start_marks_failed_and_notifies() {
    let h = harness();
    let id = h.configured().await;

    h.runner
        .fail_next_start(SyncError::InvalidRequest("stream orders is not readable".to_string()));
    h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap_err();

    assert_eq!(h.status(id).await, DatasourceStatus::Failed);
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::SyncFailed]);
}

#[tokio::test]
async fn test_delete_while_syncing_defers_purge() {
    let h = harness_with(Config {
        purge_grace: Duration::ZERO,
        ..Config::default()
    });
    let id = h.configured().await;
    let accepted = h.state.orchestrator.trigger_sync(&h.user, id).await.unwrap();

    h.state.orchestrator.delete_datasource(&h.user, id).await.unwrap();

    let err = h.state.orchestrator.get_datasource(&h.user, id).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    assert!(h.state.store.get(id).await.unwrap().is_some());
    assert!(h.state.queue.has_pending(JobKind::PurgeDatasource).await.unwrap());

    assert_eq!(h.sync_webhook(&accepted.job_token, &[("orders", 3)]).await, WebhookOutcome::Discarded);

    let worker = h.state.worker();
    assert_eq!(worker.run_due_jobs().await.unwrap(), 1);
    assert!(h.state.store.get(id).await.unwrap().is_none());
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn test_delete_idle_datasource_purges_immediately() {
    let h = harness();
    let id = h.configured().await;
    h.state
        .orchestrator
        .set_schedule(
            &h.user,
            id,
            Schedule::Interval {
                unit: TimeUnit::Days,
                magnitude: 1,
            },
        )
        .await
        .unwrap();

    h.state.orchestrator.delete_datasource(&h.user, id).await.unwrap();
    assert!(h.state.store.get(id).await.unwrap().is_none());
    assert!(h.queue.scheduled_triggers(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_due_trigger_starts_sync_and_rearms() {
    let h = harness();
    let id = h.configured().await;
    h.state
        .orchestrator
        .set_schedule(
            &h.user,
            id,
            Schedule::Interval {
                unit: TimeUnit::Hours,
                magnitude: 1,
            },
        )
        .await
        .unwrap();

    // Pull the trigger into the past so it is due now.
    h.queue
        .replace_schedule(id, Some(Utc::now() - chrono::Duration::minutes(1)))
        .await
        .unwrap();

    let worker = h.state.worker();
    assert_eq!(worker.run_due_jobs().await.unwrap(), 1);

    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Syncing);
    assert!(ds.next_run_at.unwrap() > Utc::now());

    let triggers = h.queue.scheduled_triggers(id).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert!(triggers[0].run_at > Utc::now());
    assert_eq!(triggers[0].attempts, 0);
}

#[tokio::test]
async fn test_scheduled_sync_exhausts_retries_then_rearms() {
    let h = harness_with(Config {
        job_max_attempts: 2,
        job_backoff_base: Duration::from_millis(20),
        ..Config::default()
    });
    let id = h.configured().await;
    h.state
        .orchestrator
        .set_schedule(
            &h.user,
            id,
            Schedule::Interval {
                unit: TimeUnit::Hours,
                magnitude: 1,
            },
        )
        .await
        .unwrap();
    h.queue
        .replace_schedule(id, Some(Utc::now() - chrono::Duration::minutes(1)))
        .await
        .unwrap();
    h.runner.set_unavailable(true);

    let worker = h.state.worker();
    assert_eq!(worker.run_due_jobs().await.unwrap(), 1);

    // First failure is retried and the record is left as it was.
    assert_eq!(h.status(id).await, DatasourceStatus::Scheduled);
    let triggers = h.queue.scheduled_triggers(id).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].attempts, 1);
    assert!(triggers[0].run_at < Utc::now() + chrono::Duration::seconds(1));
    assert!(triggers[0].last_error.as_deref().unwrap().contains("not reachable"));
    assert!(h.notifier.kinds().is_empty());

    // Past the retry delay (20ms base plus jitter).
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(worker.run_due_jobs().await.unwrap(), 1);

    let ds = h.state.store.get(id).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Failed);
    assert!(ds.failure_reason.as_deref().unwrap().contains("not reachable"));
    assert!(ds.next_run_at.unwrap() > Utc::now() + chrono::Duration::minutes(50));
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::SyncFailed]);

    let triggers = h.queue.scheduled_triggers(id).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].attempts, 0);
    assert!(triggers[0].run_at > Utc::now() + chrono::Duration::minutes(50));
    assert_eq!(worker.run_due_jobs().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reads_require_view_capability() {
    let h = harness();
    let id = h.configured().await;

    let locked = SyncOrchestrator::new(
        h.state.store.clone(),
        Arc::new(ConnectorCatalog::new(h.runner.clone(), Duration::from_secs(5))),
        Arc::new(ScheduleRegistry::new(h.state.queue.clone())),
        h.state.queue.clone(),
    )
    .with_authorizer(Arc::new(NoAccessAuthorizer));

    let err = locked.get_datasource(&h.user, id).await.unwrap_err();
    assert!(matches!(err, SyncError::Forbidden(_)));
    let err = locked.list_datasources(&h.user, h.team_id).await.unwrap_err();
    assert!(matches!(err, SyncError::Forbidden(_)));

    let ds = locked.get_datasource(&Principal::System, id).await.unwrap();
    assert_eq!(ds.id, id);
    let listed = h.state.orchestrator.list_datasources(&h.user, h.team_id).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_force_resync_all_counts_failures() {
    let h = harness();
    let busy = h.configured().await;
    let idle = h.configured().await;
    let _untested = h.stage().await;

    h.state.orchestrator.trigger_sync(&h.user, busy).await.unwrap();

    let report = h.state.orchestrator.force_resync_all().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.started, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.status(idle).await, DatasourceStatus::Syncing);
}

#[tokio::test]
async fn test_team_limit_blocks_staging() {
    let h = harness_with(Config {
        max_datasources_per_team: Some(1),
        ..Config::default()
    });
    h.stage().await;

    let err = h
        .state
        .orchestrator
        .stage_datasource(
            &h.user,
            StageRequest {
                team_id: h.team_id,
                org_id: Uuid::new_v4(),
                connector_type_id: CSV_CONNECTOR.to_string(),
                name: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::LimitReached(_)));
}
