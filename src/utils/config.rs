use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means development mode with in-memory store and queue.
    pub database_url: Option<String>,
    pub server_address: String,
    pub connector_runner_url: Option<String>,
    pub connector_runner_api_key: Option<String>,
    pub connector_timeout: Duration,
    pub webhook_signing_secret: Option<String>,
    pub admin_token: Option<String>,
    pub embedded_worker: bool,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub job_max_attempts: i32,
    pub job_backoff_base: Duration,
    pub job_lease: Duration,
    pub vector_limit_check_interval: Duration,
    pub reconciliation_tolerance: f64,
    pub fail_on_reconciliation_overflow: bool,
    pub max_datasources_per_team: Option<usize>,
    pub purge_grace: Duration,
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn flag(key: &str, default: bool) -> bool {
    match optional(key) {
        Some(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Check if we're in production mode
        let is_production = env::var("RUST_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            == "production";

        let database_url = optional("DATABASE_URL");
        let tolerance: f64 = parsed("RECONCILIATION_TOLERANCE", 0.05)?;
        if !(0.0..=1.0).contains(&tolerance) {
            anyhow::bail!("RECONCILIATION_TOLERANCE must be between 0 and 1, got {}", tolerance);
        }

        let max_datasources_per_team = match optional("MAX_DATASOURCES_PER_TEAM") {
            Some(raw) => Some(
                raw.parse::<usize>()
                    .context("MAX_DATASOURCES_PER_TEAM must be a positive integer")?,
            ),
            None => None,
        };

        Ok(Config {
            embedded_worker: flag("EMBEDDED_WORKER", database_url.is_none()),
            database_url,
            server_address: env::var("SERVER_ADDRESS").unwrap_or_else(|_| {
                if is_production {
                    "0.0.0.0:7680".to_string()
                } else {
                    "127.0.0.1:7680".to_string()
                }
            }),
            connector_runner_url: optional("CONNECTOR_RUNNER_URL"),
            connector_runner_api_key: optional("CONNECTOR_RUNNER_API_KEY"),
            connector_timeout: Duration::from_secs(parsed("CONNECTOR_TIMEOUT_SECS", 30)?),
            webhook_signing_secret: optional("WEBHOOK_SIGNING_SECRET"),
            admin_token: optional("ADMIN_TOKEN"),
            worker_concurrency: parsed("WORKER_CONCURRENCY", 4usize)?.max(1),
            worker_poll_interval: Duration::from_millis(parsed("WORKER_POLL_INTERVAL_MS", 1000)?),
            job_max_attempts: parsed("JOB_MAX_ATTEMPTS", 5i32)?.max(1),
            job_backoff_base: Duration::from_secs(parsed("JOB_BACKOFF_BASE_SECS", 10)?),
            job_lease: Duration::from_secs(parsed("JOB_LEASE_SECS", 300)?),
            vector_limit_check_interval: Duration::from_secs(parsed(
                "VECTOR_LIMIT_CHECK_INTERVAL_SECS",
                3600,
            )?),
            reconciliation_tolerance: tolerance,
            fail_on_reconciliation_overflow: flag("FAIL_ON_RECONCILIATION_OVERFLOW", false),
            max_datasources_per_team,
            purge_grace: Duration::from_secs(parsed("PURGE_GRACE_SECS", 300)?),
        })
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.is_none()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            server_address: "127.0.0.1:7680".to_string(),
            connector_runner_url: None,
            connector_runner_api_key: None,
            connector_timeout: Duration::from_secs(30),
            webhook_signing_secret: None,
            admin_token: None,
            embedded_worker: true,
            worker_concurrency: 4,
            worker_poll_interval: Duration::from_millis(1000),
            job_max_attempts: 5,
            job_backoff_base: Duration::from_secs(10),
            job_lease: Duration::from_secs(300),
            vector_limit_check_interval: Duration::from_secs(3600),
            reconciliation_tolerance: 0.05,
            fail_on_reconciliation_overflow: false,
            max_datasources_per_team: None,
            purge_grace: Duration::from_secs(300),
        }
    }
}
