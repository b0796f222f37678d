use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::collaborators::{LogNotifier, Notification, NotificationKind, Notifier};
use crate::core::error::{Result, SyncError};
use crate::core::store::{modify, DatasourceStore, Update};
use crate::models::{
    reconcile, Datasource, DatasourceStatus, EmbedSuccessfulPayload, ReconciliationReport,
    SyncSuccessfulPayload, WebhookOutcome,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing X-Webhook-Signature header")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

/// Checks an HMAC-SHA256 signature given as raw hex or `sha256=<hex>`.
pub fn verify_signature(secret: &str, header: Option<&str>, body: &[u8]) -> std::result::Result<(), SignatureError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::Missing)?;
    let sig_hex = header.strip_prefix("sha256=").unwrap_or(header);
    let provided = hex::decode(sig_hex).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

/// Produces the `sha256=<hex>` header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Applies asynchronous completion signals to datasources.
///
/// Deliveries are at-least-once and may arrive out of order, so record counts
/// are always overwritten from the payload and the SYNCED transition is keyed
/// on the job token.
pub struct WebhookIngestor {
    store: Arc<dyn DatasourceStore>,
    notifier: Arc<dyn Notifier>,
    tolerance: f64,
    fail_on_overflow: bool,
}

impl WebhookIngestor {
    pub fn new(store: Arc<dyn DatasourceStore>, tolerance: f64) -> Self {
        Self {
            store,
            notifier: Arc::new(LogNotifier),
            tolerance,
            fail_on_overflow: false,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_fail_on_overflow(mut self, fail_on_overflow: bool) -> Self {
        self.fail_on_overflow = fail_on_overflow;
        self
    }

    async fn resolve_sync_target(&self, token: &str, payload: &SyncSuccessfulPayload) -> Result<Option<Datasource>> {
        if let Some(ds) = self.store.find_by_job_token(token).await? {
            return Ok(Some(ds));
        }
        // The runner can answer before the job token is persisted.
        match payload.connection_id.as_deref() {
            Some(connection_id) => Ok(self
                .store
                .find_by_connection_token(connection_id)
                .await?
                .filter(|ds| {
                    ds.status == DatasourceStatus::Syncing
                        && ds.job_token.is_none()
                        && !ds.is_retired_token(token)
                })),
            None => Ok(None),
        }
    }

    pub async fn handle_sync_successful(&self, payload: SyncSuccessfulPayload) -> Result<WebhookOutcome> {
        let token = payload.job_id.trim().to_string();
        if token.is_empty() {
            return Err(SyncError::InvalidRequest("job_id is required".to_string()));
        }

        let Some(target) = self.resolve_sync_target(&token, &payload).await? else {
            warn!(job_token = %token, "sync-successful for unknown job token, discarded");
            return Ok(WebhookOutcome::Discarded);
        };

        let tolerance = self.tolerance;
        let (saved, outcome) = modify(&*self.store, target.id, |ds| {
            if ds.is_deleted() {
                return Ok(Update::Keep(WebhookOutcome::Discarded));
            }
            let already_applied = ds.last_synced_token.as_deref() == Some(token.as_str());
            let current_run = ds.job_token.as_deref() == Some(token.as_str())
                || (ds.job_token.is_none()
                    && ds.status == DatasourceStatus::Syncing
                    && !ds.is_retired_token(&token));
            if !already_applied && !current_run {
                return Ok(Update::Keep(WebhookOutcome::Discarded));
            }

            let before = ds.record_count.clone();
            ds.set_synced_counts(&payload.record_counts);
            let now = Utc::now();

            if already_applied {
                if ds.record_count == before {
                    return Ok(Update::Keep(WebhookOutcome::Duplicate));
                }
                ds.reconciliation = Some(reconcile(&ds.record_count, tolerance, now));
                return Ok(Update::Save(WebhookOutcome::Duplicate));
            }

            match ds.status {
                // FAILED covers an optimistic cancel that the run outlived.
                DatasourceStatus::Syncing | DatasourceStatus::Failed => {
                    if ds.job_token.is_none() {
                        ds.job_token = Some(token.clone());
                    }
                    ds.last_synced_token = Some(token.clone());
                    ds.failure_reason = None;
                    let finished_at = payload.timestamp.unwrap_or(now);
                    ds.last_synced_at = Some(match ds.last_synced_at {
                        Some(previous) if previous > finished_at => previous,
                        _ => finished_at,
                    });
                    ds.reconciliation = Some(reconcile(&ds.record_count, tolerance, now));
                    ds.set_status(DatasourceStatus::Synced, now);
                    Ok(Update::Save(WebhookOutcome::Applied))
                }
                _ => Ok(Update::Keep(WebhookOutcome::Discarded)),
            }
        })
        .await?;

        match outcome {
            WebhookOutcome::Applied => {
                info!(
                    datasource_id = %saved.id,
                    job_token = %token,
                    streams = payload.record_counts.len(),
                    "Sync completed"
                );
                self.notifier
                    .notify(Notification {
                        team_id: saved.team_id,
                        datasource_id: saved.id,
                        kind: NotificationKind::SyncSucceeded,
                        message: format!("Datasource '{}' synced successfully", saved.name),
                    })
                    .await;
            }
            WebhookOutcome::Duplicate => {
                info!(datasource_id = %saved.id, job_token = %token, "Duplicate sync-successful absorbed")
            }
            WebhookOutcome::Discarded => info!(
                datasource_id = %saved.id,
                job_token = %token,
                status = %saved.status,
                "sync-successful does not apply to current state, discarded"
            ),
        }
        Ok(outcome)
    }

    pub async fn handle_embed_successful(
        &self,
        payload: EmbedSuccessfulPayload,
    ) -> Result<(WebhookOutcome, Option<ReconciliationReport>)> {
        let id = payload.datasource_id;
        match self.store.get(id).await? {
            Some(ds) if !ds.is_deleted() => {}
            _ => {
                warn!(datasource_id = %id, "embed-successful for unknown datasource, discarded");
                return Ok((WebhookOutcome::Discarded, None));
            }
        }

        let tolerance = self.tolerance;
        let fail_on_overflow = self.fail_on_overflow;
        let (saved, (outcome, failed)) = modify(&*self.store, id, |ds| {
            if ds.is_deleted() {
                return Ok(Update::Keep((WebhookOutcome::Discarded, false)));
            }
            ds.set_embedded_counts(&payload.record_counts);
            let now = Utc::now();
            let report = reconcile(&ds.record_count, tolerance, now);

            let fail = fail_on_overflow && ds.status == DatasourceStatus::Synced && report.has_overflow();
            if fail {
                ds.failure_reason = Some("embedded more records than were synced".to_string());
                ds.set_status(DatasourceStatus::Failed, now);
            }
            ds.reconciliation = Some(report);
            Ok(Update::Save((WebhookOutcome::Applied, fail)))
        })
        .await?;

        let report = saved.reconciliation.clone();
        if let Some(report) = &report {
            log_reconciliation(&saved, report);
        }
        if failed {
            self.notifier
                .notify(Notification {
                    team_id: saved.team_id,
                    datasource_id: saved.id,
                    kind: NotificationKind::SyncFailed,
                    message: format!("Datasource '{}' embedded more records than it synced", saved.name),
                })
                .await;
        }
        Ok((outcome, report))
    }
}

fn log_reconciliation(ds: &Datasource, report: &ReconciliationReport) {
    for mismatch in &report.mismatches {
        if mismatch.within_tolerance {
            info!(
                datasource_id = %ds.id,
                stream = %mismatch.stream,
                synced = mismatch.synced,
                embedded = mismatch.embedded,
                "Reconciliation mismatch within tolerance"
            );
        } else {
            warn!(
                datasource_id = %ds.id,
                stream = %mismatch.stream,
                synced = mismatch.synced,
                embedded = mismatch.embedded,
                kind = ?mismatch.kind,
                "Reconciliation mismatch"
            );
        }
    }
}
