// Sync Worker - runs scheduled syncs, deferred purges and maintenance jobs
// from the shared job queue. Start as many as needed; leases keep them apart.

use anyhow::Result;
use std::env;
use tracing::info;

use datasource_sync::utils::{shutdown_signal, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("datasource_sync=info".parse()?)
                .add_directive("sea_orm=warn".parse()?)
                .add_directive("sqlx=warn".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    if config.is_in_memory() {
        anyhow::bail!("sync_worker needs DATABASE_URL; the in-memory queue is only reachable from the server process");
    }

    info!("Sync worker starting...");
    let state = AppState::new(&config).await?;

    // One-shot maintenance mode
    if env::args().nth(1).as_deref() == Some("resync-all") {
        let report = state.orchestrator.force_resync_all().await?;
        println!(
            "Re-sync finished: {} attempted, {} started, {} failed",
            report.attempted, report.started, report.failed
        );
        return Ok(());
    }

    let worker = state.worker();
    worker.ensure_limit_check().await?;
    worker.run(shutdown_signal()).await;

    Ok(())
}
