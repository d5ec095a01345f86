//! Quota checks
//!
//! Decides whether a user may add one more recipe to a collection. Counts are
//! read from the store on every call. The count-then-compare is not isolated
//! from concurrent creates, so two simultaneous requests can overshoot a limit
//! by one; the reconciler is the only component that enforces limits by deletion.

use brewlog_shared::{Account, PlanTier, RecipeStore, Store, Visibility};
use serde::Serialize;
use std::sync::Arc;

use crate::error::BillingResult;
use crate::plans::PlanCatalog;

/// Structured reason for a denial; rendering is left to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDenial {
    pub kind: Visibility,
    pub tier: PlanTier,
    pub limit: u32,
    pub current_count: u64,
    pub is_paid_tier: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied(QuotaDenial),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }
}

/// Current usage of one collection against its limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsageSummary {
    pub limit: u32,
    pub used: u64,
}

pub struct QuotaChecker {
    catalog: Arc<PlanCatalog>,
    store: Arc<dyn Store>,
}

impl QuotaChecker {
    pub fn new(catalog: Arc<PlanCatalog>, store: Arc<dyn Store>) -> Self {
        Self { catalog, store }
    }

    /// Denied iff the user already holds `limit` or more recipes of this kind.
    ///
    /// Only store faults produce an error.
    pub async fn can_create(
        &self,
        account: &Account,
        kind: Visibility,
    ) -> BillingResult<QuotaDecision> {
        let tier = self.catalog.resolve_tier(&account.plan_tier);
        let limit = self.catalog.limit_for(tier, kind);
        let current_count = self.store.count(account.id, kind).await?;

        if current_count >= u64::from(limit) {
            tracing::info!(
                user_id = %account.id,
                tier = %tier,
                kind = %kind.kind(),
                limit,
                current_count,
                "Quota denied"
            );
            return Ok(QuotaDecision::Denied(QuotaDenial {
                kind,
                tier,
                limit,
                current_count,
                is_paid_tier: tier.is_paid(),
            }));
        }

        Ok(QuotaDecision::Allowed)
    }

    pub async fn usage(
        &self,
        account: &Account,
        kind: Visibility,
    ) -> BillingResult<QuotaUsageSummary> {
        let tier = self.catalog.resolve_tier(&account.plan_tier);
        Ok(QuotaUsageSummary {
            limit: self.catalog.limit_for(tier, kind),
            used: self.store.count(account.id, kind).await?,
        })
    }
}
