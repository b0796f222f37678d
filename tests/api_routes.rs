use salvo::prelude::*;
use salvo::test::{ResponseExt, TestClient};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use datasource_sync::api::app_router;
use datasource_sync::core::collaborators::LogNotifier;
use datasource_sync::core::connectors::{ConnectorType, MemoryConnectorRunner};
use datasource_sync::core::queue::MemoryJobQueue;
use datasource_sync::core::store::MemoryDatasourceStore;
use datasource_sync::core::webhooks::{sign, SIGNATURE_HEADER};
use datasource_sync::models::{DiscoveredStream, StreamCatalog};
use datasource_sync::utils::middleware::{ACCOUNT_HEADER, ADMIN_TOKEN_HEADER};
use datasource_sync::utils::{AppState, Config};

const BASE: &str = "http://127.0.0.1:7680/api";
const SECRET: &str = "whsec-test";

fn service() -> Service {
    let runner = MemoryConnectorRunner::new().with_connector(
        ConnectorType {
            id: "source-csv-http".to_string(),
            name: "CSV over HTTP".to_string(),
            icon: None,
            connector_type: "source".to_string(),
        },
        StreamCatalog {
            streams: vec![DiscoveredStream {
                name: "orders".to_string(),
                fields: vec!["id".to_string(), "total".to_string()],
                parent: None,
            }],
        },
    );
    let config = Config {
        webhook_signing_secret: Some(SECRET.to_string()),
        admin_token: Some("admin-secret".to_string()),
        ..Config::default()
    };
    let state = AppState::from_parts(
        config,
        Arc::new(MemoryDatasourceStore::new()),
        Arc::new(MemoryJobQueue::new()),
        Arc::new(runner),
        Arc::new(LogNotifier),
    );
    Service::new(app_router(state))
}

#[tokio::test]
async fn test_health_is_public() {
    let service = service();
    let mut res = TestClient::get(format!("{}/health", BASE)).send(&service).await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_datasource_routes_require_account() {
    let service = service();
    let team_id = Uuid::new_v4();
    let res = TestClient::get(format!("{}/teams/{}/datasources", BASE, team_id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn test_stage_test_select_and_sync_over_http() {
    let service = service();
    let team_id = Uuid::new_v4();

    let mut res = TestClient::post(format!("{}/teams/{}/datasources", BASE, team_id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .json(&json!({ "org_id": Uuid::new_v4(), "connector_type_id": "source-csv-http" }))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CREATED));
    let body: Value = res.take_json().await.unwrap();
    let id = body["datasource_id"].as_str().unwrap().to_string();
    assert_eq!(body["datasource"]["name"], "CSV over HTTP");
    assert!(body["datasource"].get("connector_config").is_none());

    let mut res = TestClient::post(format!("{}/datasources/{}/test", BASE, id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .json(&json!({ "config": { "url": "https://files.example.com/orders.csv" } }))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["stream_catalog"]["streams"][0]["name"], "orders");

    let res = TestClient::patch(format!("{}/datasources/{}/streams", BASE, id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .json(&json!({ "streams": ["orders"], "fields_map": { "orders": ["id", "total"] } }))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));

    let res = TestClient::post(format!("{}/datasources/{}/sync", BASE, id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CONFLICT));

    let mut res = TestClient::patch(format!("{}/datasources/{}/schedule", BASE, id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .json(&json!({ "kind": "manual" }))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["status"], "scheduled");

    let mut res = TestClient::post(format!("{}/datasources/{}/sync", BASE, id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::ACCEPTED));
    let body: Value = res.take_json().await.unwrap();
    let job_token = body["job_token"].as_str().unwrap().to_string();

    let res = TestClient::post(format!("{}/datasources/{}/sync", BASE, id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CONFLICT));

    let payload = json!({ "job_id": job_token, "record_counts": { "orders": 12 } }).to_string();
    let mut res = TestClient::post(format!("{}/webhooks/sync-successful", BASE))
        .add_header(SIGNATURE_HEADER, sign(SECRET, payload.as_bytes()), true)
        .raw_json(payload)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["outcome"], "applied");

    let mut res = TestClient::get(format!("{}/datasources/{}", BASE, id))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .send(&service)
        .await;
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["status"], "synced");
    assert_eq!(body["record_count"]["orders"]["synced"], 12);
}

#[tokio::test]
async fn test_unsigned_webhook_is_rejected() {
    let service = service();
    let res = TestClient::post(format!("{}/webhooks/sync-successful", BASE))
        .json(&json!({ "job_id": "job-1", "record_counts": {} }))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));

    let payload = json!({ "job_id": "job-1" }).to_string();
    let res = TestClient::post(format!("{}/webhooks/sync-successful", BASE))
        .add_header(SIGNATURE_HEADER, sign("wrong-secret", payload.as_bytes()), true)
        .raw_json(payload)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn test_malformed_ids_are_bad_requests() {
    let service = service();
    let res = TestClient::get(format!("{}/datasources/not-a-uuid", BASE))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let res = TestClient::get(format!("{}/datasources/{}", BASE, Uuid::new_v4()))
        .add_header(ACCOUNT_HEADER, "alice", true)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_resync_all_requires_admin_token() {
    let service = service();
    let res = TestClient::post(format!("{}/admin/resync-all", BASE))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let mut res = TestClient::post(format!("{}/admin/resync-all", BASE))
        .add_header(ADMIN_TOKEN_HEADER, "admin-secret", true)
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::ACCEPTED));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["queued"], true);
}
