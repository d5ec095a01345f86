//! Plan catalog
//!
//! Immutable mapping from tier to quotas, plus the price-id lookup used to
//! translate payment events into tiers. Built once at startup and shared by
//! the quota checker, the reconciler and the webhook handler.

use brewlog_shared::{PlanTier, Visibility};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};

/// Limit value meaning "no limit"
pub const UNLIMITED: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub preset_limit: u32,
    pub share_limit: u32,
    /// Picture-in-picture brew timer
    pub has_extra_feature: bool,
}

impl PlanLimits {
    /// Free tier: 1 preset, 1 share
    pub fn free() -> Self {
        Self {
            preset_limit: 1,
            share_limit: 1,
            has_extra_feature: false,
        }
    }

    /// Basic tier: 5 presets, 5 shares
    pub fn basic() -> Self {
        Self {
            preset_limit: 5,
            share_limit: 5,
            has_extra_feature: false,
        }
    }

    /// Premium tier: 10 presets, 10 shares, PiP timer
    pub fn premium() -> Self {
        Self {
            preset_limit: 10,
            share_limit: 10,
            has_extra_feature: true,
        }
    }

    /// Unlimited tier: no caps
    pub fn unlimited() -> Self {
        Self {
            preset_limit: UNLIMITED,
            share_limit: UNLIMITED,
            has_extra_feature: true,
        }
    }

    pub fn limit_for(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Private => self.preset_limit,
            Visibility::Shared => self.share_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    limits: HashMap<PlanTier, PlanLimits>,
    price_tiers: HashMap<String, PlanTier>,
    default_paid_tier: PlanTier,
    most_restrictive: PlanTier,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl PlanCatalog {
    /// Catalog with the standard limits and no price mappings
    pub fn standard() -> Self {
        let limits = HashMap::from([
            (PlanTier::Free, PlanLimits::free()),
            (PlanTier::Basic, PlanLimits::basic()),
            (PlanTier::Premium, PlanLimits::premium()),
            (PlanTier::Unlimited, PlanLimits::unlimited()),
        ]);
        Self {
            most_restrictive: most_restrictive_of(&limits),
            limits,
            price_tiers: HashMap::new(),
            default_paid_tier: PlanTier::Basic,
        }
    }

    /// Catalog with custom limits. Every tier must be present.
    pub fn with_limits(
        limits: impl IntoIterator<Item = (PlanTier, PlanLimits)>,
    ) -> BillingResult<Self> {
        let limits: HashMap<PlanTier, PlanLimits> = limits.into_iter().collect();
        if let Some(missing) = PlanTier::ALL.iter().find(|t| !limits.contains_key(*t)) {
            return Err(BillingError::Config(format!(
                "plan catalog has no limits for tier {missing}"
            )));
        }
        Ok(Self {
            most_restrictive: most_restrictive_of(&limits),
            limits,
            price_tiers: HashMap::new(),
            default_paid_tier: PlanTier::Basic,
        })
    }

    /// Standard limits plus the price mapping and default tier from config
    pub fn from_config(config: &BillingConfig) -> Self {
        config
            .price_ids
            .entries()
            .into_iter()
            .fold(Self::standard(), |catalog, (price, tier)| {
                catalog.with_price(price, tier)
            })
            .with_default_paid_tier(config.default_paid_tier)
    }

    pub fn with_price(mut self, price_id: impl Into<String>, tier: PlanTier) -> Self {
        self.price_tiers.insert(price_id.into(), tier);
        self
    }

    pub fn with_default_paid_tier(mut self, tier: PlanTier) -> Self {
        self.default_paid_tier = tier;
        self
    }

    pub fn limits_for(&self, tier: PlanTier) -> PlanLimits {
        // Every tier is present by construction; the fallback is unreachable
        self.limits
            .get(&tier)
            .copied()
            .unwrap_or_else(PlanLimits::free)
    }

    pub fn limit_for(&self, tier: PlanTier, visibility: Visibility) -> u32 {
        self.limits_for(tier).limit_for(visibility)
    }

    /// Tier with the smallest quotas
    pub fn most_restrictive(&self) -> PlanTier {
        self.most_restrictive
    }

    /// Resolve a stored or received tier name.
    ///
    /// Unrecognised values fail closed to the most restrictive tier.
    pub fn resolve_tier(&self, raw: &str) -> PlanTier {
        match raw.parse::<PlanTier>() {
            Ok(tier) => tier,
            Err(e) => {
                tracing::warn!(
                    raw_tier = %raw,
                    fallback = %self.most_restrictive,
                    error = %e,
                    "Unknown plan tier, failing closed"
                );
                self.most_restrictive
            }
        }
    }

    pub fn tier_for_price(&self, price_id: &str) -> Option<PlanTier> {
        self.price_tiers.get(price_id).copied()
    }

    pub fn default_paid_tier(&self) -> PlanTier {
        self.default_paid_tier
    }
}

fn most_restrictive_of(limits: &HashMap<PlanTier, PlanLimits>) -> PlanTier {
    PlanTier::ALL
        .iter()
        .copied()
        .filter_map(|tier| limits.get(&tier).map(|l| (tier, l)))
        .min_by_key(|(_, l)| (l.preset_limit, l.share_limit, l.has_extra_feature))
        .map(|(tier, _)| tier)
        .unwrap_or(PlanTier::Free)
}
