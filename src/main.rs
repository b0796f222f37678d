use dotenv::dotenv;
use salvo::conn::tcp::TcpAcceptor;
use salvo::prelude::*;
use std::time::Duration;
use tokio::sync::watch;

use datasource_sync::api;
use datasource_sync::utils::{shutdown_signal, AppState, Config};

/// Bind to address, retrying while a previous process still holds the port
async fn bind_with_retry(address: &str, max_retries: u32) -> anyhow::Result<TcpAcceptor> {
    let socket_addr: std::net::SocketAddr = address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address format {}: {}", address, e))?;

    for attempt in 1..=max_retries {
        match tokio::net::TcpListener::bind(socket_addr).await {
            Ok(test_listener) => {
                drop(test_listener);
                tokio::time::sleep(Duration::from_millis(200)).await;
                tracing::info!("🔗 Binding to {} (attempt {})", address, attempt);
                return Ok(TcpListener::new(address.to_string()).bind().await);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt < max_retries => {
                tracing::warn!(
                    "⚠️  Port {} is in use (attempt {}/{}), retrying in 1 second...",
                    socket_addr.port(),
                    attempt,
                    max_retries
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => anyhow::bail!("Failed to bind to {}: {}", address, e),
        }
    }

    anyhow::bail!("Failed to bind to {} after {} attempts", address, max_retries)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("datasource_sync=info".parse()?)
                .add_directive("salvo=info".parse()?)
                .add_directive("sea_orm=warn".parse()?)
                .add_directive("sqlx=warn".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    let state = AppState::new(&config).await?;

    // In-process worker for single-node deployments; otherwise run the sync_worker binary.
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let worker_handle = if config.embedded_worker {
        let worker = state.worker();
        if let Err(e) = worker.ensure_limit_check().await {
            tracing::error!("Failed to seed vector limit check: {}", e);
        }
        Some(tokio::spawn(async move {
            worker
                .run(async move {
                    let _ = stop_rx.changed().await;
                })
                .await;
        }))
    } else {
        None
    };

    let router = api::app_router(state);

    let acceptor = bind_with_retry(&config.server_address, 5).await?;
    tracing::info!("🚀 Datasource sync service listening on {}", config.server_address);

    let server = Server::new(acceptor);
    tokio::select! {
        _ = server.serve(Service::new(router)) => {
            tracing::info!("🛑 Server stopped");
        }
        _ = shutdown_signal() => {
            tracing::info!("🛑 Shutting down gracefully");
        }
    }

    let _ = stop_tx.send(true);
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            tracing::error!("Embedded worker task failed: {}", e);
        }
    }

    Ok(())
}
