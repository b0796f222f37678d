use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::DatasourceStore;
use crate::core::error::{Result, SyncError};
use crate::models::Datasource;

#[derive(Default)]
pub struct MemoryDatasourceStore {
    records: RwLock<HashMap<Uuid, Datasource>>,
}

impl MemoryDatasourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasourceStore for MemoryDatasourceStore {
    async fn insert(&self, datasource: &Datasource) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&datasource.id) {
            return Err(SyncError::Store(format!("datasource {} already exists", datasource.id)));
        }
        records.insert(datasource.id, datasource.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Datasource>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_job_token(&self, job_token: &str) -> Result<Option<Datasource>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|d| d.job_token.as_deref() == Some(job_token))
            .cloned())
    }

    async fn find_by_connection_token(&self, connection_token: &str) -> Result<Option<Datasource>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|d| d.connection_token.as_deref() == Some(connection_token))
            .cloned())
    }

    async fn list_for_team(&self, team_id: Uuid) -> Result<Vec<Datasource>> {
        let mut list: Vec<Datasource> = self
            .records
            .read()
            .await
            .values()
            .filter(|d| d.team_id == team_id && !d.is_deleted())
            .cloned()
            .collect();
        list.sort_by_key(|d| d.created_at);
        Ok(list)
    }

    async fn count_for_team(&self, team_id: Uuid) -> Result<usize> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|d| d.team_id == team_id && !d.is_deleted())
            .count())
    }

    async fn list_with_connection(&self) -> Result<Vec<Datasource>> {
        let mut list: Vec<Datasource> = self
            .records
            .read()
            .await
            .values()
            .filter(|d| d.has_connector_binding() && !d.is_deleted())
            .cloned()
            .collect();
        list.sort_by_key(|d| d.created_at);
        Ok(list)
    }

    async fn compare_and_swap(&self, datasource: &Datasource) -> Result<Option<Datasource>> {
        let mut records = self.records.write().await;
        match records.get_mut(&datasource.id) {
            Some(current) if current.version == datasource.version => {
                let mut next = datasource.clone();
                next.version += 1;
                *current = next.clone();
                Ok(Some(next))
            }
            Some(_) => Ok(None),
            None => Err(SyncError::NotFound(datasource.id)),
        }
    }

    async fn purge(&self, id: Uuid) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }
}
