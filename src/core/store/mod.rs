pub mod memory;
pub mod postgres;

pub use memory::MemoryDatasourceStore;
pub use postgres::PgDatasourceStore;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::core::error::{Result, SyncError};
use crate::models::Datasource;

/// Attempts made by [`modify`] before reporting contention.
pub const MAX_CAS_ATTEMPTS: usize = 8;

#[async_trait]
pub trait DatasourceStore: Send + Sync {
    async fn insert(&self, datasource: &Datasource) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Datasource>>;

    async fn find_by_job_token(&self, job_token: &str) -> Result<Option<Datasource>>;

    async fn find_by_connection_token(&self, connection_token: &str) -> Result<Option<Datasource>>;

    /// Live (not deleted) datasources of a team, oldest first.
    async fn list_for_team(&self, team_id: Uuid) -> Result<Vec<Datasource>>;

    async fn count_for_team(&self, team_id: Uuid) -> Result<usize>;

    /// Live datasources with a connector binding.
    async fn list_with_connection(&self) -> Result<Vec<Datasource>>;

    /// Writes `datasource` only if the stored version still equals
    /// `datasource.version`. Returns the saved record with its bumped version,
    /// or `None` when another writer got there first.
    async fn compare_and_swap(&self, datasource: &Datasource) -> Result<Option<Datasource>>;

    async fn purge(&self, id: Uuid) -> Result<()>;
}

/// Result of a [`modify`] closure.
pub enum Update<T> {
    /// Persist the mutated record, then return `T`.
    Save(T),
    /// Leave the record untouched.
    Keep(T),
}

/// Read-modify-write with optimistic concurrency.
///
/// `f` gets a fresh copy on every attempt; it must be free of side effects
/// since it may run several times. An `Err` from `f` aborts without writing.
pub async fn modify<S, T, F>(store: &S, id: Uuid, mut f: F) -> Result<(Datasource, T)>
where
    S: DatasourceStore + ?Sized,
    F: FnMut(&mut Datasource) -> Result<Update<T>>,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let mut datasource = store.get(id).await?.ok_or(SyncError::NotFound(id))?;

        match f(&mut datasource)? {
            Update::Keep(value) => return Ok((datasource, value)),
            Update::Save(value) => {
                datasource.updated_at = Utc::now();
                if let Some(saved) = store.compare_and_swap(&datasource).await? {
                    return Ok((saved, value));
                }
                debug!(datasource_id = %id, attempt, "version conflict, re-reading");
            }
        }
    }

    Err(SyncError::Contention(id))
}
