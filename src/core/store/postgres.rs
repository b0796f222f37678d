use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::DatasourceStore;
use crate::core::error::{Result, SyncError};
use crate::models::{
    Datasource, DatasourceStatus, ReconciliationReport, RecordCounts, Schedule, StreamCatalog,
};

const COLUMNS: &str = "id, team_id, org_id, name, connector_type_id, connector_name, connector_config, \
     stream_catalog, selected_streams, selected_fields_map, schedule, next_run_at, status, \
     failure_reason, record_count, reconciliation, connection_token, job_token, last_synced_token, \
     retired_job_tokens, sync_attempt, created_at, updated_at, status_changed_at, last_synced_at, deleted_at, version";

#[derive(Clone)]
pub struct PgDatasourceStore {
    pool: PgPool,
}

impl PgDatasourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(&self, sql: &str, key: &str) -> Result<Option<Datasource>> {
        let row = sqlx::query(sql).bind(key).fetch_optional(&self.pool).await?;
        row.map(|r| datasource_from_row(&r)).transpose()
    }
}

fn datasource_from_row(row: &PgRow) -> Result<Datasource> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<DatasourceStatus>()
        .map_err(SyncError::Store)?;

    Ok(Datasource {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        connector_type_id: row.try_get("connector_type_id")?,
        connector_name: row.try_get("connector_name")?,
        connector_config: row.try_get("connector_config")?,
        stream_catalog: row
            .try_get::<Option<Json<StreamCatalog>>, _>("stream_catalog")?
            .map(|Json(c)| c),
        selected_streams: row.try_get::<Json<Vec<String>>, _>("selected_streams")?.0,
        selected_fields_map: row
            .try_get::<Json<BTreeMap<String, Vec<String>>>, _>("selected_fields_map")?.0,
        schedule: row.try_get::<Json<Schedule>, _>("schedule")?.0,
        next_run_at: row.try_get("next_run_at")?,
        status,
        failure_reason: row.try_get("failure_reason")?,
        record_count: row.try_get::<Json<RecordCounts>, _>("record_count")?.0,
        reconciliation: row
            .try_get::<Option<Json<ReconciliationReport>>, _>("reconciliation")?
            .map(|Json(r)| r),
        connection_token: row.try_get("connection_token")?,
        job_token: row.try_get("job_token")?,
        last_synced_token: row.try_get("last_synced_token")?,
        retired_job_tokens: row.try_get::<Json<Vec<String>>, _>("retired_job_tokens")?.0,
        sync_attempt: row.try_get("sync_attempt")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        status_changed_at: row.try_get("status_changed_at")?,
        last_synced_at: row.try_get("last_synced_at")?,
        deleted_at: row.try_get("deleted_at")?,
        version: row.try_get("version")?,
    })
}

#[async_trait]
impl DatasourceStore for PgDatasourceStore {
    async fn insert(&self, ds: &Datasource) -> Result<()> {
        sqlx::query(
            "INSERT INTO datasources (id, team_id, org_id, name, connector_type_id, connector_name, \
             connector_config, stream_catalog, selected_streams, selected_fields_map, schedule, \
             next_run_at, status, failure_reason, record_count, reconciliation, connection_token, \
             job_token, last_synced_token, retired_job_tokens, sync_attempt, created_at, updated_at, \
             status_changed_at, last_synced_at, deleted_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19, $20, $21, $22, $23, $24, $25, $26, $27)",
        )
        .bind(ds.id)
        .bind(ds.team_id)
        .bind(ds.org_id)
        .bind(&ds.name)
        .bind(&ds.connector_type_id)
        .bind(&ds.connector_name)
        .bind(&ds.connector_config)
        .bind(ds.stream_catalog.as_ref().map(Json))
        .bind(Json(&ds.selected_streams))
        .bind(Json(&ds.selected_fields_map))
        .bind(Json(&ds.schedule))
        .bind(ds.next_run_at)
        .bind(ds.status.as_str())
        .bind(&ds.failure_reason)
        .bind(Json(&ds.record_count))
        .bind(ds.reconciliation.as_ref().map(Json))
        .bind(&ds.connection_token)
        .bind(&ds.job_token)
        .bind(&ds.last_synced_token)
        .bind(Json(&ds.retired_job_tokens))
        .bind(ds.sync_attempt)
        .bind(ds.created_at)
        .bind(ds.updated_at)
        .bind(ds.status_changed_at)
        .bind(ds.last_synced_at)
        .bind(ds.deleted_at)
        .bind(ds.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Datasource>> {
        let row = sqlx::query(&format!("SELECT {} FROM datasources WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| datasource_from_row(&r)).transpose()
    }

    async fn find_by_job_token(&self, job_token: &str) -> Result<Option<Datasource>> {
        self.fetch_optional(
            &format!("SELECT {} FROM datasources WHERE job_token = $1 LIMIT 1", COLUMNS),
            job_token,
        )
        .await
    }

    async fn find_by_connection_token(&self, connection_token: &str) -> Result<Option<Datasource>> {
        self.fetch_optional(
            &format!("SELECT {} FROM datasources WHERE connection_token = $1 LIMIT 1", COLUMNS),
            connection_token,
        )
        .await
    }

    async fn list_for_team(&self, team_id: Uuid) -> Result<Vec<Datasource>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM datasources WHERE team_id = $1 AND deleted_at IS NULL ORDER BY created_at",
            COLUMNS
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(datasource_from_row).collect()
    }

    async fn count_for_team(&self, team_id: Uuid) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM datasources WHERE team_id = $1 AND deleted_at IS NULL",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn list_with_connection(&self) -> Result<Vec<Datasource>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM datasources WHERE connection_token IS NOT NULL AND deleted_at IS NULL \
             ORDER BY created_at",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(datasource_from_row).collect()
    }

    async fn compare_and_swap(&self, ds: &Datasource) -> Result<Option<Datasource>> {
        let row = sqlx::query(&format!(
            "UPDATE datasources SET name = $3, connector_config = $4, stream_catalog = $5, \
             selected_streams = $6, selected_fields_map = $7, schedule = $8, next_run_at = $9, \
             status = $10, failure_reason = $11, record_count = $12, reconciliation = $13, \
             connection_token = $14, job_token = $15, last_synced_token = $16, updated_at = $17, \
             status_changed_at = $18, last_synced_at = $19, deleted_at = $20, \
             retired_job_tokens = $21, sync_attempt = $22, version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING {}",
            COLUMNS
        ))
        .bind(ds.id)
        .bind(ds.version)
        .bind(&ds.name)
        .bind(&ds.connector_config)
        .bind(ds.stream_catalog.as_ref().map(Json))
        .bind(Json(&ds.selected_streams))
        .bind(Json(&ds.selected_fields_map))
        .bind(Json(&ds.schedule))
        .bind(ds.next_run_at)
        .bind(ds.status.as_str())
        .bind(&ds.failure_reason)
        .bind(Json(&ds.record_count))
        .bind(ds.reconciliation.as_ref().map(Json))
        .bind(&ds.connection_token)
        .bind(&ds.job_token)
        .bind(&ds.last_synced_token)
        .bind(ds.updated_at)
        .bind(ds.status_changed_at)
        .bind(ds.last_synced_at)
        .bind(ds.deleted_at)
        .bind(Json(&ds.retired_job_tokens))
        .bind(ds.sync_attempt)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(datasource_from_row(&row)?)),
            None => {
                // Distinguish a lost race from a purged row.
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM datasources WHERE id = $1)")
                        .bind(ds.id)
                        .fetch_one(&self.pool)
                        .await?;
                if exists {
                    Ok(None)
                } else {
                    Err(SyncError::NotFound(ds.id))
                }
            }
        }
    }

    async fn purge(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM datasources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
