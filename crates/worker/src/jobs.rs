//! Scheduled job bodies
//!
//! Each job takes the clock as an argument so it can be run against the
//! in-memory store in tests.

use brewlog_billing::{BillingResult, InvariantCheckSummary, QuotaInvariantChecker};
use brewlog_shared::{AccountStore, RecipeStore, Store, StoreResult};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

/// Days a deactivated account is kept before it is purged
pub const ACCOUNT_PURGE_GRACE_DAYS: i64 = 30;

/// Delete shares whose expiry has passed
pub async fn purge_expired_shares(store: &dyn Store, now: OffsetDateTime) -> StoreResult<u64> {
    let deleted = store.delete_expired_shares(now).await?;
    info!(deleted, "Expired share cleanup complete");
    Ok(deleted)
}

/// Delete accounts, with their recipes, deactivated more than the grace period ago
pub async fn purge_deactivated_accounts(
    store: &dyn Store,
    now: OffsetDateTime,
) -> StoreResult<u64> {
    let cutoff = now - Duration::days(ACCOUNT_PURGE_GRACE_DAYS);
    let purged = store.purge_deactivated_before(cutoff).await?;
    info!(purged, cutoff = %cutoff, "Deactivated account purge complete");
    Ok(purged)
}

/// Run the quota invariant checks and log what they find
pub async fn run_invariant_sweep(
    checker: &QuotaInvariantChecker,
) -> BillingResult<InvariantCheckSummary> {
    let summary = checker.run_all_checks().await?;
    if summary.healthy {
        info!(checks_run = summary.checks_run, "Quota invariants hold");
    } else {
        for violation in &summary.violations {
            warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                users = ?violation.user_ids,
                "{}",
                violation.description
            );
        }
        error!(
            checks_failed = summary.checks_failed,
            violations = summary.violations.len(),
            "Quota invariant violations found"
        );
    }
    Ok(summary)
}
