use serde_json::Value;
use std::collections::HashSet;

use crate::core::error::{Result, SyncError};
use crate::models::{DiscoveredStream, StreamCatalog};

/// Connector families with locally known behaviour. Anything not recognised
/// is `Remote` and relies on the runner entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    CsvHttp,
    Database,
    Remote,
}

impl From<&str> for ConnectorKind {
    fn from(s: &str) -> Self {
        let id = s.to_lowercase();
        match id.trim_start_matches("source-") {
            "csv-http" | "csv" | "file" => ConnectorKind::CsvHttp,
            "postgres" | "postgresql" | "mysql" | "sqlite" | "sqlserver" | "mssql" | "oracle"
            | "clickhouse" => ConnectorKind::Database,
            _ => ConnectorKind::Remote,
        }
    }
}

impl ConnectorKind {
    /// Configuration schema served without a runner round-trip.
    pub fn builtin_specification(&self) -> Option<Value> {
        match self {
            ConnectorKind::CsvHttp => Some(serde_json::json!({
                "type": "object",
                "required": ["url"],
                "properties": {
                    "url": {
                        "type": "string",
                        "title": "File URL",
                        "description": "HTTP(S) location of the CSV file"
                    },
                    "delimiter": {
                        "type": "string",
                        "title": "Delimiter",
                        "default": ","
                    },
                    "header_row": {
                        "type": "boolean",
                        "title": "First row is a header",
                        "default": true
                    }
                }
            })),
            ConnectorKind::Database | ConnectorKind::Remote => None,
        }
    }

    /// Local sanity check before the runner is contacted. Failures count as a
    /// rejected connection test.
    pub fn validate_config(&self, config: &Value) -> Result<()> {
        let Some(object) = config.as_object() else {
            return Err(SyncError::ConnectionTestFailed(
                "configuration must be a JSON object".to_string(),
            ));
        };

        if let ConnectorKind::CsvHttp = self {
            let url = object
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SyncError::ConnectionTestFailed("'url' is required".to_string()))?;
            let parsed = url::Url::parse(url)
                .map_err(|e| SyncError::ConnectionTestFailed(format!("invalid url '{}': {}", url, e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(SyncError::ConnectionTestFailed(format!(
                    "unsupported url scheme '{}'",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }

    pub fn normalize_catalog(&self, catalog: StreamCatalog) -> StreamCatalog {
        let mut seen = HashSet::new();
        let mut streams: Vec<DiscoveredStream> = catalog
            .streams
            .into_iter()
            .filter(|s| !s.name.trim().is_empty() && seen.insert(s.name.clone()))
            .map(|mut stream| {
                if let ConnectorKind::CsvHttp = self {
                    // CSV headers frequently carry stray whitespace
                    stream.fields = stream.fields.into_iter().map(|f| f.trim().to_string()).collect();
                }
                let mut fields_seen = HashSet::new();
                stream.fields.retain(|f| !f.is_empty() && fields_seen.insert(f.clone()));
                stream
            })
            .collect();

        let names: HashSet<String> = streams.iter().map(|s| s.name.clone()).collect();
        for stream in &mut streams {
            if let Some(parent) = &stream.parent {
                if !names.contains(parent) || parent == &stream.name {
                    stream.parent = None;
                }
            }
        }

        if let ConnectorKind::Database = self {
            streams.sort_by(|a, b| a.name.cmp(&b.name));
        }

        StreamCatalog { streams }
    }
}
