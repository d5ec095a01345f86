// Worker clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Brewlog Background Worker
//!
//! Handles scheduled jobs including:
//! - Expired share cleanup (daily at 3:00 AM UTC)
//! - Deactivated account purge after the grace period (daily at 4:00 AM UTC)
//! - Quota invariant sweep (hourly)
//! - Heartbeat (every 5 minutes)

mod jobs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use brewlog_billing::{PlanCatalog, QuotaInvariantChecker};
use brewlog_shared::{create_pool, PgStore, Store};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Brewlog Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url, 5).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let catalog = Arc::new(PlanCatalog::from_config(&brewlog_billing::BillingConfig::from_env()));
    let checker = Arc::new(QuotaInvariantChecker::new(catalog, store.clone()));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Delete expired shares (daily at 3:00 AM UTC)
    let share_store = store.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let store = share_store.clone();
            Box::pin(async move {
                info!("Running expired share cleanup");
                if let Err(e) =
                    jobs::purge_expired_shares(store.as_ref(), OffsetDateTime::now_utc()).await
                {
                    error!(error = %e, "Expired share cleanup failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Expired share cleanup (daily at 3:00 AM UTC)");

    // Job 2: Purge accounts deactivated more than 30 days ago (daily at 4:00 AM UTC)
    let purge_store = store.clone();
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let store = purge_store.clone();
            Box::pin(async move {
                info!("Running deactivated account purge");
                let now = OffsetDateTime::now_utc();
                if let Err(e) = jobs::purge_deactivated_accounts(store.as_ref(), now).await {
                    error!(error = %e, "Deactivated account purge failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Deactivated account purge (daily at 4:00 AM UTC)");

    // Job 3: Quota invariant sweep (hourly, at minute 15)
    let sweep_checker = checker.clone();
    scheduler
        .add(Job::new_async("0 15 * * * *", move |_uuid, _l| {
            let checker = sweep_checker.clone();
            Box::pin(async move {
                info!("Running quota invariant sweep");
                if let Err(e) = jobs::run_invariant_sweep(&checker).await {
                    error!(error = %e, "Quota invariant sweep failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Quota invariant sweep (hourly)");

    // Job 4: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Brewlog Worker started successfully with {} scheduled jobs", 4);

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
