pub mod http;
pub mod kind;
pub mod memory;

pub use http::HttpConnectorRunner;
pub use kind::ConnectorKind;
pub use memory::MemoryConnectorRunner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::error::{Result, SyncError};
use crate::models::StreamCatalog;

fn default_connector_type() -> String {
    "source".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// `source` or `destination`; only sources can back a datasource.
    #[serde(default = "default_connector_type")]
    pub connector_type: String,
}

impl ConnectorType {
    pub fn is_source(&self) -> bool {
        self.connector_type == "source"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub connection_token: String,
    pub catalog: StreamCatalog,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunRequest {
    pub connection_token: String,
    pub streams: Vec<String>,
    pub fields_map: BTreeMap<String, Vec<String>>,
}

/// The remote service that tests connector configurations and executes syncs.
#[async_trait]
pub trait ConnectorRunner: Send + Sync {
    async fn list_connector_types(&self) -> Result<Vec<ConnectorType>>;

    async fn get_specification(&self, connector_type_id: &str) -> Result<Value>;

    /// Rejections surface as `ConnectionTestFailed` with the runner's reason.
    async fn test_and_discover(&self, connector_type_id: &str, config: &Value) -> Result<Discovery>;

    /// Returns the job token that later correlates the success webhook.
    async fn start_sync(&self, request: &SyncRunRequest) -> Result<String>;

    async fn cancel_run(&self, job_token: &str) -> Result<()>;
}

/// Client-side facade over a [`ConnectorRunner`]: call timeouts, the
/// per-process specification cache, and connector-kind dispatch.
pub struct ConnectorCatalog {
    runner: Arc<dyn ConnectorRunner>,
    timeout: Duration,
    specs: RwLock<HashMap<String, Value>>,
}

impl ConnectorCatalog {
    pub fn new(runner: Arc<dyn ConnectorRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            specs: RwLock::new(HashMap::new()),
        }
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::UpstreamUnavailable(format!(
                "{} timed out after {}s",
                operation,
                self.timeout.as_secs()
            ))),
        }
    }

    pub async fn list_connector_types(&self) -> Result<Vec<ConnectorType>> {
        let types = self
            .bounded("list connector types", self.runner.list_connector_types())
            .await?;
        Ok(types.into_iter().filter(|t| t.is_source()).collect())
    }

    /// Lists source connectors, degrading to an empty list when the runner is down.
    pub async fn list_connector_types_or_empty(&self) -> Vec<ConnectorType> {
        match self.list_connector_types().await {
            Ok(types) => types,
            Err(e) => {
                warn!("Failed to list connector types, returning empty list: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn get_specification(&self, connector_type_id: &str, force_refresh: bool) -> Result<Value> {
        if !force_refresh {
            if let Some(spec) = self.specs.read().await.get(connector_type_id) {
                debug!(connector_type_id, "specification cache hit");
                return Ok(spec.clone());
            }
        }

        let spec = match ConnectorKind::from(connector_type_id).builtin_specification() {
            Some(spec) => spec,
            None => {
                self.bounded("get specification", self.runner.get_specification(connector_type_id))
                    .await?
            }
        };

        self.specs
            .write()
            .await
            .insert(connector_type_id.to_string(), spec.clone());
        Ok(spec)
    }

    pub async fn test_and_discover(&self, connector_type_id: &str, config: &Value) -> Result<Discovery> {
        let kind = ConnectorKind::from(connector_type_id);
        kind.validate_config(config)?;

        let discovery = self
            .bounded(
                "test connection",
                self.runner.test_and_discover(connector_type_id, config),
            )
            .await?;

        let catalog = kind.normalize_catalog(discovery.catalog);
        info!(
            connector_type_id,
            kind = ?kind,
            streams = catalog.streams.len(),
            "Connection test succeeded"
        );
        Ok(Discovery {
            connection_token: discovery.connection_token,
            catalog,
        })
    }

    pub async fn start_sync(&self, request: &SyncRunRequest) -> Result<String> {
        self.bounded("start sync", self.runner.start_sync(request)).await
    }

    pub async fn cancel_run(&self, job_token: &str) -> Result<()> {
        self.bounded("cancel run", self.runner.cancel_run(job_token)).await
    }

    /// Requests a remote abort without waiting for it.
    pub fn cancel_run_detached(&self, job_token: String) {
        let runner = self.runner.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, runner.cancel_run(&job_token)).await {
                Ok(Ok(())) => info!(job_token = %job_token, "Remote run cancelled"),
                Ok(Err(e)) => warn!(job_token = %job_token, "Failed to cancel remote run: {}", e),
                Err(_) => warn!(job_token = %job_token, "Cancelling remote run timed out"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveredStream;

    fn catalog_with(runner: MemoryConnectorRunner) -> (Arc<MemoryConnectorRunner>, ConnectorCatalog) {
        let runner = Arc::new(runner);
        let catalog = ConnectorCatalog::new(runner.clone(), Duration::from_secs(5));
        (runner, catalog)
    }

    #[tokio::test]
    async fn list_only_returns_sources() {
        let runner = MemoryConnectorRunner::new()
            .with_connector(
                ConnectorType {
                    id: "postgres".into(),
                    name: "Postgres".into(),
                    icon: None,
                    connector_type: "source".into(),
                },
                StreamCatalog::default(),
            )
            .with_connector(
                ConnectorType {
                    id: "qdrant".into(),
                    name: "Qdrant".into(),
                    icon: None,
                    connector_type: "destination".into(),
                },
                StreamCatalog::default(),
            );
        let (_, catalog) = catalog_with(runner);

        let types = catalog.list_connector_types().await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].id, "postgres");
    }

    #[tokio::test]
    async fn unavailable_runner_degrades_to_empty_list() {
        let (runner, catalog) = catalog_with(MemoryConnectorRunner::new());
        runner.set_unavailable(true);

        assert!(matches!(
            catalog.list_connector_types().await,
            Err(SyncError::UpstreamUnavailable(_))
        ));
        assert!(catalog.list_connector_types_or_empty().await.is_empty());
    }

    #[tokio::test]
    async fn specification_is_cached_until_refresh() {
        let (runner, catalog) = catalog_with(MemoryConnectorRunner::new());
        runner.set_specification("postgres", serde_json::json!({"version": 1}));
        assert_eq!(
            catalog.get_specification("postgres", false).await.unwrap()["version"],
            1
        );

        runner.set_specification("postgres", serde_json::json!({"version": 2}));
        assert_eq!(
            catalog.get_specification("postgres", false).await.unwrap()["version"],
            1
        );
        assert_eq!(
            catalog.get_specification("postgres", true).await.unwrap()["version"],
            2
        );
    }

    #[tokio::test]
    async fn discovery_is_normalized_per_kind() {
        let raw = StreamCatalog {
            streams: vec![
                DiscoveredStream {
                    name: "zeta".into(),
                    fields: vec!["id".into(), "id".into()],
                    parent: None,
                },
                DiscoveredStream {
                    name: "alpha".into(),
                    fields: vec!["id".into()],
                    parent: Some("missing".into()),
                },
            ],
        };
        let runner = MemoryConnectorRunner::new().with_connector(
            ConnectorType {
                id: "postgres".into(),
                name: "Postgres".into(),
                icon: None,
                connector_type: "source".into(),
            },
            raw,
        );
        let (_, catalog) = catalog_with(runner);

        let discovery = catalog
            .test_and_discover("postgres", &serde_json::json!({"host": "db"}))
            .await
            .unwrap();
        assert_eq!(discovery.catalog.names(), vec!["alpha", "zeta"]);
        assert_eq!(discovery.catalog.get("zeta").unwrap().fields, vec!["id"]);
        assert_eq!(discovery.catalog.get("alpha").unwrap().parent, None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_runner_times_out_as_unavailable() {
        let (runner, _) = catalog_with(MemoryConnectorRunner::new());
        runner.set_delay(Duration::from_secs(60));
        let catalog = ConnectorCatalog::new(runner, Duration::from_secs(1));

        let result = catalog
            .start_sync(&SyncRunRequest {
                connection_token: "conn-1".into(),
                streams: vec!["orders".into()],
                fields_map: BTreeMap::new(),
            })
            .await;
        assert!(matches!(result, Err(SyncError::UpstreamUnavailable(_))));
    }
}
