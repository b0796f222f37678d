use salvo::prelude::*;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::core::webhooks::{verify_signature, SIGNATURE_HEADER};
use crate::core::SyncError;
use crate::models::{EmbedSuccessfulPayload, SyncSuccessfulPayload};
use crate::utils::{get_app_state, AppError, AppState};

/// Reads the raw body, checks the signature when a secret is configured, then decodes it.
async fn read_signed<T: DeserializeOwned>(req: &mut Request, state: &AppState) -> Result<T, AppError> {
    let signature = req.header::<String>(SIGNATURE_HEADER);
    let body = req
        .payload()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read body: {}", e)))?
        .to_vec();

    if let Some(secret) = &state.config.webhook_signing_secret {
        if let Err(e) = verify_signature(secret, signature.as_deref(), &body) {
            warn!("Rejected webhook delivery: {}", e);
            return Err(e.into());
        }
    }

    serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))
}

/// Infrastructure failures answer 503 so the sender redelivers; everything else is final.
fn ingest_error(e: SyncError) -> AppError {
    if e.is_retryable() {
        error!("Webhook ingestion failed, sender should retry: {}", e);
        return AppError::ServiceUnavailable(e.to_string());
    }
    e.into()
}

#[handler]
pub async fn sync_successful(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let payload: SyncSuccessfulPayload = read_signed(req, state).await?;

    let outcome = state
        .webhooks
        .handle_sync_successful(payload)
        .await
        .map_err(ingest_error)?;
    res.render(Json(serde_json::json!({ "outcome": outcome })));
    Ok(())
}

#[handler]
pub async fn embed_successful(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let payload: EmbedSuccessfulPayload = read_signed(req, state).await?;

    let (outcome, report) = state
        .webhooks
        .handle_embed_successful(payload)
        .await
        .map_err(ingest_error)?;
    res.render(Json(serde_json::json!({
        "outcome": outcome,
        "reconciliation": report,
    })));
    Ok(())
}

pub fn webhook_routes() -> Router {
    Router::with_path("webhooks")
        .push(Router::with_path("sync-successful").post(sync_successful))
        .push(Router::with_path("embed-successful").post(embed_successful))
}
