use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::prelude::*;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u8 = 3;

/// Connects, applies pending migrations and returns the pool used by the
/// store and queue.
pub async fn initialize(database_url: &str) -> anyhow::Result<PgPool> {
    let db = connect(database_url).await?;

    info!("🔄 Running database migrations...");
    if let Err(e) = migration::Migrator::up(&db, None).await {
        error!("❌ Database migration failed: {}", e);
        return Err(e.into());
    }
    info!("✅ Database migrations completed");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;
    Ok(pool)
}

async fn connect(database_url: &str) -> Result<DatabaseConnection, sea_orm::DbErr> {
    info!("🔌 Connecting to database: {}", mask_database_url(database_url));

    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(2)
        .connect_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let mut attempts = 0;
    loop {
        attempts += 1;
        match Database::connect(opt.clone()).await {
            Ok(db) => {
                info!("✅ Database connection established");
                return Ok(db);
            }
            Err(e) => {
                error!("❌ Database connection attempt {}/{} failed: {}", attempts, MAX_ATTEMPTS, e);

                let message = e.to_string();
                if message.contains("Connection refused") {
                    error!("🚨 Database server appears to be down or unreachable");
                } else if message.contains("authentication") || message.contains("password") {
                    error!("🚨 Database authentication failed");
                } else if message.contains("does not exist") {
                    error!("🚨 Target database does not exist");
                }

                if attempts >= MAX_ATTEMPTS {
                    return Err(e);
                }
                warn!("⏳ Retrying database connection in 2 seconds...");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Hides the password part of a connection URL.
pub fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(scheme_pos) = url[..colon_pos].rfind("://") {
                let scheme_end = scheme_pos + 3;
                let username = &url[scheme_end..colon_pos];
                return format!("{}{}:****{}", &url[..scheme_end], username, &url[at_pos..]);
            }
        }
    }
    url.to_string()
}
