use salvo::Depot;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::collaborators::{LogNotifier, Notifier, TeamQuota};
use crate::core::connectors::{
    ConnectorCatalog, ConnectorRunner, HttpConnectorRunner, MemoryConnectorRunner,
};
use crate::core::orchestrator::SyncOrchestrator;
use crate::core::queue::{JobQueue, MemoryJobQueue, PgJobQueue};
use crate::core::schedule::ScheduleRegistry;
use crate::core::store::{DatasourceStore, MemoryDatasourceStore, PgDatasourceStore};
use crate::core::webhooks::WebhookIngestor;
use crate::core::worker::{JobWorker, WorkerSettings};
use crate::utils::db;
use crate::utils::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DatasourceStore>,
    pub queue: Arc<dyn JobQueue>,
    pub catalog: Arc<ConnectorCatalog>,
    pub schedules: Arc<ScheduleRegistry>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub webhooks: Arc<WebhookIngestor>,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let (store, queue): (Arc<dyn DatasourceStore>, Arc<dyn JobQueue>) = match &config.database_url {
            Some(url) => {
                let pool = db::initialize(url).await?;
                (
                    Arc::new(PgDatasourceStore::new(pool.clone())),
                    Arc::new(PgJobQueue::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory store and queue");
                (
                    Arc::new(MemoryDatasourceStore::new()),
                    Arc::new(MemoryJobQueue::new()),
                )
            }
        };

        let runner: Arc<dyn ConnectorRunner> = match &config.connector_runner_url {
            Some(url) => {
                info!("Using connector runner at {}", url);
                Arc::new(HttpConnectorRunner::new(
                    url,
                    config.connector_runner_api_key.clone(),
                    config.connector_timeout,
                )?)
            }
            None => {
                warn!("CONNECTOR_RUNNER_URL not set, using in-process connector runner");
                Arc::new(MemoryConnectorRunner::new())
            }
        };

        Ok(Self::from_parts(config.clone(), store, queue, runner, Arc::new(LogNotifier)))
    }

    /// Wires the services together over already constructed backends.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn DatasourceStore>,
        queue: Arc<dyn JobQueue>,
        runner: Arc<dyn ConnectorRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let catalog = Arc::new(ConnectorCatalog::new(runner, config.connector_timeout));
        let schedules = Arc::new(ScheduleRegistry::new(queue.clone()));

        let orchestrator = SyncOrchestrator::new(store.clone(), catalog.clone(), schedules.clone(), queue.clone())
            .with_limits(Arc::new(TeamQuota::new(store.clone(), config.max_datasources_per_team)))
            .with_notifier(notifier.clone())
            .with_purge_grace(config.purge_grace);

        let webhooks = WebhookIngestor::new(store.clone(), config.reconciliation_tolerance)
            .with_notifier(notifier)
            .with_fail_on_overflow(config.fail_on_reconciliation_overflow);

        Self {
            config: Arc::new(config),
            store,
            queue,
            catalog,
            schedules,
            orchestrator: Arc::new(orchestrator),
            webhooks: Arc::new(webhooks),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.config.worker_concurrency,
            poll_interval: self.config.worker_poll_interval,
            max_attempts: self.config.job_max_attempts,
            backoff_base: self.config.job_backoff_base,
            lease: self.config.job_lease,
            limit_check_interval: self.config.vector_limit_check_interval,
            ..WorkerSettings::default()
        }
    }

    pub fn worker(&self) -> JobWorker {
        JobWorker::new(
            self.queue.clone(),
            self.store.clone(),
            self.orchestrator.clone(),
            self.schedules.clone(),
            self.worker_settings(),
        )
    }
}

pub fn get_app_state(depot: &Depot) -> Result<&AppState, salvo::http::StatusError> {
    depot
        .obtain::<AppState>()
        .map_err(|_| salvo::http::StatusError::internal_server_error())
}
