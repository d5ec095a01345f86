//! Downgrade reconciliation
//!
//! After a tier change, trims each collection back under the new tier's limit.
//! The oldest recipes always survive; the newest excess ones are deleted.
//! Presets and shares are evaluated independently, and a collection whose
//! limit did not shrink is never touched.

use brewlog_shared::{PlanTier, RecipeStore, Store, UserId, Visibility};
use serde::Serialize;
use std::sync::Arc;

use crate::error::BillingResult;
use crate::plans::PlanCatalog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub deleted_preset_count: u64,
    pub deleted_share_count: u64,
}

impl ReconcileOutcome {
    pub fn total_deleted(&self) -> u64 {
        self.deleted_preset_count + self.deleted_share_count
    }
}

pub struct DowngradeReconciler {
    catalog: Arc<PlanCatalog>,
    store: Arc<dyn Store>,
}

impl DowngradeReconciler {
    pub fn new(catalog: Arc<PlanCatalog>, store: Arc<dyn Store>) -> Self {
        Self { catalog, store }
    }

    /// Restore the quota invariant for `user` after moving from `old_tier` to `new_tier`.
    ///
    /// A store failure is returned as an error even if one collection was
    /// already trimmed; calling again converges on the same final state.
    pub async fn reconcile(
        &self,
        user: UserId,
        old_tier: PlanTier,
        new_tier: PlanTier,
    ) -> BillingResult<ReconcileOutcome> {
        let old_limits = self.catalog.limits_for(old_tier);
        let new_limits = self.catalog.limits_for(new_tier);

        let mut outcome = ReconcileOutcome::default();
        if new_limits.preset_limit < old_limits.preset_limit {
            outcome.deleted_preset_count = self
                .trim(user, Visibility::Private, new_limits.preset_limit)
                .await?;
        }
        if new_limits.share_limit < old_limits.share_limit {
            outcome.deleted_share_count = self
                .trim(user, Visibility::Shared, new_limits.share_limit)
                .await?;
        }

        if outcome.total_deleted() > 0 {
            tracing::info!(
                user_id = %user,
                old_tier = %old_tier,
                new_tier = %new_tier,
                deleted_presets = outcome.deleted_preset_count,
                deleted_shares = outcome.deleted_share_count,
                "Downgrade reconciliation removed excess recipes"
            );
        } else {
            tracing::debug!(
                user_id = %user,
                old_tier = %old_tier,
                new_tier = %new_tier,
                "Downgrade reconciliation found nothing to remove"
            );
        }

        Ok(outcome)
    }

    async fn trim(&self, user: UserId, kind: Visibility, limit: u32) -> BillingResult<u64> {
        let count = self.store.count(user, kind).await?;
        if count <= u64::from(limit) {
            return Ok(0);
        }
        let deleted = self
            .store
            .delete_newest_beyond(user, kind, u64::from(limit))
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id = %user,
                    kind = %kind.kind(),
                    error = %e,
                    "Failed to delete excess recipes"
                );
                e
            })?;
        Ok(deleted)
    }
}
