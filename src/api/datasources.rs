use chrono::{DateTime, Utc};
use salvo::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::orchestrator::{StageRequest, StreamSelection};
use crate::models::{
    Datasource, DatasourceStatus, ReconciliationReport, RecordCounts, Schedule, StreamCatalog,
};
use crate::utils::middleware::get_principal;
use crate::utils::{get_app_state, AppError};

#[derive(Debug, Deserialize)]
pub struct StageDatasourceRequest {
    pub org_id: Uuid,
    pub connector_type_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TestConfigurationRequest {
    pub config: Value,
}

/// Datasource as returned to clients. Connector configuration and tokens stay server side.
#[derive(Debug, Serialize)]
pub struct DatasourceResponse {
    pub id: Uuid,
    pub team_id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub connector_type_id: String,
    pub connector_name: String,
    pub status: DatasourceStatus,
    pub failure_reason: Option<String>,
    pub stream_catalog: Option<StreamCatalog>,
    pub selected_streams: Vec<String>,
    pub selected_fields_map: BTreeMap<String, Vec<String>>,
    pub schedule: Schedule,
    pub next_run_at: Option<DateTime<Utc>>,
    pub record_count: RecordCounts,
    pub reconciliation: Option<ReconciliationReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<Datasource> for DatasourceResponse {
    fn from(ds: Datasource) -> Self {
        Self {
            id: ds.id,
            team_id: ds.team_id,
            org_id: ds.org_id,
            name: ds.name,
            connector_type_id: ds.connector_type_id,
            connector_name: ds.connector_name,
            status: ds.status,
            failure_reason: ds.failure_reason,
            stream_catalog: ds.stream_catalog,
            selected_streams: ds.selected_streams,
            selected_fields_map: ds.selected_fields_map,
            schedule: ds.schedule,
            next_run_at: ds.next_run_at,
            record_count: ds.record_count,
            reconciliation: ds.reconciliation,
            created_at: ds.created_at,
            updated_at: ds.updated_at,
            status_changed_at: ds.status_changed_at,
            last_synced_at: ds.last_synced_at,
        }
    }
}

fn uuid_param(req: &Request, name: &str) -> Result<Uuid, AppError> {
    let raw = req
        .param::<String>(name)
        .ok_or_else(|| AppError::BadRequest(format!("Missing {}", name)))?;
    Uuid::parse_str(&raw).map_err(|_| AppError::BadRequest(format!("Invalid {}: {}", name, raw)))
}

#[handler]
pub async fn list_datasources(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let team_id = uuid_param(req, "team_id")?;

    let datasources = state.orchestrator.list_datasources(&principal, team_id).await?;
    let body: Vec<DatasourceResponse> = datasources.into_iter().map(DatasourceResponse::from).collect();
    res.render(Json(body));
    Ok(())
}

#[handler]
pub async fn stage_datasource(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let team_id = uuid_param(req, "team_id")?;

    let body: StageDatasourceRequest = req
        .parse_json()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let ds = state
        .orchestrator
        .stage_datasource(
            &principal,
            StageRequest {
                team_id,
                org_id: body.org_id,
                connector_type_id: body.connector_type_id,
                name: body.name,
            },
        )
        .await?;

    res.status_code(StatusCode::CREATED);
    res.render(Json(serde_json::json!({
        "datasource_id": ds.id,
        "datasource": DatasourceResponse::from(ds),
    })));
    Ok(())
}

#[handler]
pub async fn get_datasource(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let id = uuid_param(req, "datasource_id")?;

    let ds = state.orchestrator.get_datasource(&principal, id).await?;
    res.render(Json(DatasourceResponse::from(ds)));
    Ok(())
}

#[handler]
pub async fn delete_datasource(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let id = uuid_param(req, "datasource_id")?;

    state.orchestrator.delete_datasource(&principal, id).await?;
    res.status_code(StatusCode::NO_CONTENT);
    Ok(())
}

#[handler]
pub async fn test_configuration(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let id = uuid_param(req, "datasource_id")?;

    let body: TestConfigurationRequest = req
        .parse_json()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let catalog = state
        .orchestrator
        .test_configuration(&principal, id, body.config)
        .await?;
    res.render(Json(serde_json::json!({ "stream_catalog": catalog })));
    Ok(())
}

#[handler]
pub async fn select_streams(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let id = uuid_param(req, "datasource_id")?;

    let selection: StreamSelection = req
        .parse_json()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let ds = state.orchestrator.select_streams(&principal, id, selection).await?;
    res.render(Json(DatasourceResponse::from(ds)));
    Ok(())
}

#[handler]
pub async fn set_schedule(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let id = uuid_param(req, "datasource_id")?;

    let schedule: Schedule = req
        .parse_json()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid schedule: {}", e)))?;

    let ds = state.orchestrator.set_schedule(&principal, id, schedule).await?;
    res.render(Json(DatasourceResponse::from(ds)));
    Ok(())
}

#[handler]
pub async fn trigger_sync(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let id = uuid_param(req, "datasource_id")?;

    let accepted = state.orchestrator.trigger_sync(&principal, id).await?;
    res.status_code(StatusCode::ACCEPTED);
    res.render(Json(accepted));
    Ok(())
}

#[handler]
pub async fn cancel_sync(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let principal = get_principal(depot)?;
    let id = uuid_param(req, "datasource_id")?;

    let outcome = state.orchestrator.cancel_sync(&principal, id).await?;
    res.status_code(StatusCode::ACCEPTED);
    res.render(Json(serde_json::json!({ "outcome": outcome })));
    Ok(())
}

pub fn datasource_routes() -> Router {
    Router::new()
        .push(
            Router::with_path("teams/{team_id}/datasources")
                .get(list_datasources)
                .post(stage_datasource),
        )
        .push(
            Router::with_path("datasources/{datasource_id}")
                .get(get_datasource)
                .delete(delete_datasource)
                .push(Router::with_path("test").post(test_configuration))
                .push(Router::with_path("streams").patch(select_streams))
                .push(Router::with_path("schedule").patch(set_schedule))
                .push(Router::with_path("sync").post(trigger_sync).delete(cancel_sync)),
        )
}
