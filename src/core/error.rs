use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Datasource not found: {0}")]
    NotFound(Uuid),

    #[error("Missing capability: {0}")]
    Forbidden(String),

    #[error("Datasource limit reached for team {0}")]
    LimitReached(Uuid),

    #[error("Connector runner unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Connection test failed: {0}")]
    ConnectionTestFailed(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conflicting operation: {0}")]
    ConflictingOperation(String),

    #[error("Concurrent modification of datasource {0}, retries exhausted")]
    Contention(Uuid),

    #[error("Store error: {0}")]
    Store(String),

    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Transient failures that the queue worker retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::UpstreamUnavailable(_)
                | SyncError::Contention(_)
                | SyncError::Store(_)
                | SyncError::Sqlx(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
