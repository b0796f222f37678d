use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ConnectorRunner, ConnectorType, Discovery, SyncRunRequest};
use crate::core::error::{Result, SyncError};
use crate::models::StreamCatalog;

/// Scripted in-process connector runner for development mode and tests.
#[derive(Default)]
pub struct MemoryConnectorRunner {
    connectors: Mutex<Vec<ConnectorType>>,
    catalogs: Mutex<HashMap<String, StreamCatalog>>,
    specifications: Mutex<HashMap<String, Value>>,
    test_rejections: Mutex<VecDeque<String>>,
    start_failures: Mutex<VecDeque<SyncError>>,
    started: Mutex<Vec<SyncRunRequest>>,
    cancelled: Mutex<Vec<String>>,
    unavailable: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    sequence: AtomicU64,
}

impl MemoryConnectorRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connector(self, connector: ConnectorType, catalog: StreamCatalog) -> Self {
        if let Ok(mut catalogs) = self.catalogs.lock() {
            catalogs.insert(connector.id.clone(), catalog);
        }
        if let Ok(mut connectors) = self.connectors.lock() {
            connectors.push(connector);
        }
        self
    }

    pub fn set_specification(&self, connector_type_id: &str, spec: Value) {
        if let Ok(mut specs) = self.specifications.lock() {
            specs.insert(connector_type_id.to_string(), spec);
        }
    }

    /// The next `test_and_discover` call is rejected with `reason`.
    pub fn reject_next_test(&self, reason: &str) {
        if let Ok(mut rejections) = self.test_rejections.lock() {
            rejections.push_back(reason.to_string());
        }
    }

    /// The next `start_sync` call fails with `error`.
    pub fn fail_next_start(&self, error: SyncError) {
        if let Ok(mut failures) = self.start_failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.lock() {
            *flag = unavailable;
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.delay.lock() {
            *current = Some(delay);
        }
    }

    pub fn started_runs(&self) -> Vec<SyncRunRequest> {
        self.started.lock().map(|runs| runs.clone()).unwrap_or_default()
    }

    pub fn cancelled_runs(&self) -> Vec<String> {
        self.cancelled.lock().map(|runs| runs.clone()).unwrap_or_default()
    }

    fn next_token(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn enter(&self) -> Result<()> {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.lock().map(|flag| *flag).unwrap_or(false) {
            return Err(SyncError::UpstreamUnavailable(
                "connector runner is not reachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectorRunner for MemoryConnectorRunner {
    async fn list_connector_types(&self) -> Result<Vec<ConnectorType>> {
        self.enter().await?;
        Ok(self
            .connectors
            .lock()
            .map(|connectors| connectors.clone())
            .unwrap_or_default())
    }

    async fn get_specification(&self, connector_type_id: &str) -> Result<Value> {
        self.enter().await?;
        Ok(self
            .specifications
            .lock()
            .ok()
            .and_then(|specs| specs.get(connector_type_id).cloned())
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})))
    }

    async fn test_and_discover(&self, connector_type_id: &str, _config: &Value) -> Result<Discovery> {
        self.enter().await?;
        if let Some(reason) = self
            .test_rejections
            .lock()
            .ok()
            .and_then(|mut rejections| rejections.pop_front())
        {
            return Err(SyncError::ConnectionTestFailed(reason));
        }

        let catalog = self
            .catalogs
            .lock()
            .ok()
            .and_then(|catalogs| catalogs.get(connector_type_id).cloned())
            .ok_or_else(|| {
                SyncError::ConnectionTestFailed(format!("unknown connector type '{}'", connector_type_id))
            })?;

        Ok(Discovery {
            connection_token: self.next_token("conn"),
            catalog,
        })
    }

    async fn start_sync(&self, request: &SyncRunRequest) -> Result<String> {
        self.enter().await?;
        if let Some(error) = self
            .start_failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front())
        {
            return Err(error);
        }
        if let Ok(mut started) = self.started.lock() {
            started.push(request.clone());
        }
        Ok(self.next_token("job"))
    }

    async fn cancel_run(&self, job_token: &str) -> Result<()> {
        self.enter().await?;
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.push(job_token.to_string());
        }
        Ok(())
    }
}
