use chrono::Utc;
use salvo::prelude::*;
use tracing::info;

use crate::models::{JobKind, NewJob};
use crate::utils::{get_app_state, AppError};

/// Queues a re-sync of every datasource with a connection. A pending request is reused.
#[handler]
pub async fn resync_all(res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;

    if state.queue.has_pending(JobKind::ForceResyncAll).await? {
        res.status_code(StatusCode::ACCEPTED);
        res.render(Json(serde_json::json!({ "queued": false, "reason": "already pending" })));
        return Ok(());
    }

    let job_id = state
        .queue
        .enqueue(NewJob::global(JobKind::ForceResyncAll, Utc::now()))
        .await?;
    info!("Queued force re-sync of all datasources as job {}", job_id);

    res.status_code(StatusCode::ACCEPTED);
    res.render(Json(serde_json::json!({ "queued": true, "job_id": job_id })));
    Ok(())
}

pub fn admin_routes() -> Router {
    Router::with_path("admin").push(Router::with_path("resync-all").post(resync_all))
}
