//! Quota invariants
//!
//! Read-only consistency checks over stored accounts and recipes. They can be
//! run after a webhook replay or on a schedule to confirm that every account
//! sits within its plan's limits.

use brewlog_shared::{AccountStore, PlanTier, RecipeStore, Store, UserId, Visibility};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::plans::PlanCatalog;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Account(s) affected
    pub user_ids: Vec<UserId>,
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// High - quota exceeded, reconciliation missed or failed
    High,
    /// Medium - stored data the system cannot interpret
    Medium,
    /// Low - housekeeping lag, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    /// True when no violation was found
    pub healthy: bool,
}

pub struct QuotaInvariantChecker {
    catalog: Arc<PlanCatalog>,
    store: Arc<dyn Store>,
}

impl QuotaInvariantChecker {
    pub fn new(catalog: Arc<PlanCatalog>, store: Arc<dyn Store>) -> Self {
        Self { catalog, store }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        self.run_all_checks_at(OffsetDateTime::now_utc()).await
    }

    pub async fn run_all_checks_at(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<InvariantCheckSummary> {
        let mut violations = Vec::new();
        let mut checks_passed = 0;
        let mut checks_failed = 0;

        for name in Self::available_checks() {
            let found = self.run_check_at(name, now).await?;
            if found.is_empty() {
                checks_passed += 1;
            } else {
                checks_failed += 1;
                for v in &found {
                    tracing::warn!(
                        invariant = %v.invariant,
                        severity = %v.severity,
                        users = ?v.user_ids,
                        "{}",
                        v.description
                    );
                }
                violations.extend(found);
            }
        }

        let summary = InvariantCheckSummary {
            checked_at: now,
            checks_run: checks_passed + checks_failed,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        };
        tracing::info!(
            checks_run = summary.checks_run,
            checks_failed = summary.checks_failed,
            healthy = summary.healthy,
            "Quota invariant checks complete"
        );
        Ok(summary)
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        self.run_check_at(name, OffsetDateTime::now_utc()).await
    }

    async fn run_check_at(
        &self,
        name: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "presets_within_limit" => self.check_within_limit(Visibility::Private).await,
            "shares_within_limit" => self.check_within_limit(Visibility::Shared).await,
            "plan_tier_recognised" => self.check_plan_tier_recognised().await,
            "expired_shares_purged" => self.check_expired_shares_purged(now).await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "presets_within_limit",
            "shares_within_limit",
            "plan_tier_recognised",
            "expired_shares_purged",
        ]
    }

    async fn check_within_limit(&self, kind: Visibility) -> BillingResult<Vec<InvariantViolation>> {
        let invariant = match kind {
            Visibility::Private => "presets_within_limit",
            Visibility::Shared => "shares_within_limit",
        };
        let rows = self.store.quota_usage().await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let tier = self.catalog.resolve_tier(&row.plan_tier);
                let limit = self.catalog.limit_for(tier, kind);
                let count = match kind {
                    Visibility::Private => row.preset_count,
                    Visibility::Shared => row.share_count,
                };
                (count > u64::from(limit)).then(|| InvariantViolation {
                    invariant: invariant.to_string(),
                    user_ids: vec![row.user_id],
                    description: format!(
                        "Account holds {count} {}s but tier '{tier}' allows {limit}",
                        kind.kind()
                    ),
                    context: serde_json::json!({
                        "plan_tier": row.plan_tier,
                        "resolved_tier": tier,
                        "count": count,
                        "limit": limit,
                    }),
                    severity: ViolationSeverity::High,
                })
            })
            .collect())
    }

    async fn check_plan_tier_recognised(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.store.quota_usage().await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.plan_tier.parse::<PlanTier>().is_err())
            .map(|row| InvariantViolation {
                invariant: "plan_tier_recognised".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Account has unrecognised plan tier '{}', treated as {}",
                    row.plan_tier,
                    self.catalog.most_restrictive()
                ),
                context: serde_json::json!({ "plan_tier": row.plan_tier }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    async fn check_expired_shares_purged(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let expired = self.store.count_expired_shares(now).await?;
        if expired == 0 {
            return Ok(vec![]);
        }
        Ok(vec![InvariantViolation {
            invariant: "expired_shares_purged".to_string(),
            user_ids: vec![],
            description: format!("{expired} expired shares are still stored"),
            context: serde_json::json!({ "expired_count": expired }),
            severity: ViolationSeverity::Low,
        }])
    }
}
