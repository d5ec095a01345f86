//! Database pool and migrations

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::StoreResult;

/// Create a Postgres connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Database pool created");
    Ok(pool)
}

/// Apply the embedded migrations
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
