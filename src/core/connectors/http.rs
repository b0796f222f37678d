use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ConnectorRunner, ConnectorType, Discovery, SyncRunRequest};
use crate::core::error::{Result, SyncError};
use crate::models::StreamCatalog;

#[derive(Deserialize)]
struct ConnectorList {
    connectors: Vec<ConnectorType>,
}

#[derive(Deserialize)]
struct DiscoverResponse {
    connection_id: String,
    catalog: StreamCatalog,
}

#[derive(Deserialize)]
struct StartJobResponse {
    job_id: String,
}

/// Connector runner reached over its REST API.
pub struct HttpConnectorRunner {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpConnectorRunner {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| SyncError::InvalidRequest(format!("invalid connector runner url: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("datasource-sync/0.1")
            .build()
            .map_err(|e| SyncError::UpstreamUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| SyncError::InvalidRequest(format!("invalid connector runner path '{}': {}", path, e)))?;
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        Ok(match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        })
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| SyncError::UpstreamUnavailable(e.to_string()))
    }

    /// 5xx means the runner itself is unhealthy; other failures are returned as-is.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(SyncError::UpstreamUnavailable(format!("runner returned {}: {}", status, body)))
        } else {
            Err(SyncError::InvalidRequest(format!("runner returned {}: {}", status, body)))
        }
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::UpstreamUnavailable(format!("malformed runner response: {}", e)))
    }
}

#[async_trait]
impl ConnectorRunner for HttpConnectorRunner {
    async fn list_connector_types(&self) -> Result<Vec<ConnectorType>> {
        let response = Self::check(Self::send(self.request(Method::GET, "v1/connectors")?).await?).await?;
        let list: ConnectorList = Self::json(response).await?;
        Ok(list.connectors)
    }

    async fn get_specification(&self, connector_type_id: &str) -> Result<Value> {
        let path = format!("v1/connectors/{}/specification", connector_type_id);
        let response = Self::check(Self::send(self.request(Method::GET, &path)?).await?).await?;
        let mut body: Value = Self::json(response).await?;
        Ok(match body.get_mut("connectionSpecification") {
            Some(spec) => spec.take(),
            None => body,
        })
    }

    async fn test_and_discover(&self, connector_type_id: &str, config: &Value) -> Result<Discovery> {
        let builder = self
            .request(Method::POST, "v1/connections/discover")?
            .json(&serde_json::json!({
                "connector_type_id": connector_type_id,
                "config": config,
            }));
        let response = Self::send(builder).await?;

        let status = response.status();
        if status.is_client_error() {
            // The runner explains why the credentials or settings were refused.
            let reason = response.text().await.unwrap_or_default();
            return Err(SyncError::ConnectionTestFailed(reason));
        }
        let response = Self::check(response).await?;
        let discovered: DiscoverResponse = Self::json(response).await?;

        Ok(Discovery {
            connection_token: discovered.connection_id,
            catalog: discovered.catalog,
        })
    }

    async fn start_sync(&self, request: &SyncRunRequest) -> Result<String> {
        let builder = self.request(Method::POST, "v1/jobs")?.json(&serde_json::json!({
            "connection_id": request.connection_token,
            "streams": request.streams,
            "fields_map": request.fields_map,
        }));
        let response = Self::check(Self::send(builder).await?).await?;
        let started: StartJobResponse = Self::json(response).await?;
        Ok(started.job_id)
    }

    async fn cancel_run(&self, job_token: &str) -> Result<()> {
        let path = format!("v1/jobs/{}", job_token);
        let response = Self::send(self.request(Method::DELETE, &path)?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Already finished or never existed
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_its_path_prefix() {
        let runner =
            HttpConnectorRunner::new("http://runner.internal:8000/api", None, Duration::from_secs(5)).unwrap();
        let request = runner.request(Method::GET, "v1/connectors").unwrap().build().unwrap();
        assert_eq!(request.url().as_str(), "http://runner.internal:8000/api/v1/connectors");
    }

    #[test]
    fn api_key_is_sent_as_bearer() {
        let runner = HttpConnectorRunner::new(
            "http://runner.internal:8000",
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let request = runner.request(Method::DELETE, "v1/jobs/job-1").unwrap().build().unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap().to_str().unwrap(),
            "Bearer secret"
        );
    }

    #[test]
    fn rejects_malformed_base_url() {
        assert!(HttpConnectorRunner::new("not a url", None, Duration::from_secs(5)).is_err());
    }
}
