//! Billing configuration
//!
//! Read once at startup and passed into the services that need it.

use brewlog_shared::PlanTier;

/// Stripe price ids for each paid tier
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub basic: Option<String>,
    pub premium: Option<String>,
    pub unlimited: Option<String>,
}

impl PriceIds {
    pub fn from_env() -> Self {
        Self {
            basic: non_empty_env("STRIPE_PRICE_ID_BASIC"),
            premium: non_empty_env("STRIPE_PRICE_ID_PREMIUM"),
            unlimited: non_empty_env("STRIPE_PRICE_ID_UNLIMITED"),
        }
    }

    /// (price id, tier) pairs for every configured price
    pub fn entries(&self) -> Vec<(String, PlanTier)> {
        [
            (&self.basic, PlanTier::Basic),
            (&self.premium, PlanTier::Premium),
            (&self.unlimited, PlanTier::Unlimited),
        ]
        .into_iter()
        .filter_map(|(id, tier)| id.clone().map(|id| (id, tier)))
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Stripe webhook signing secret (`whsec_...`); webhooks are refused without it
    pub webhook_secret: Option<String>,
    pub price_ids: PriceIds,
    /// Tier granted when an active subscription's price cannot be mapped
    pub default_paid_tier: PlanTier,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            price_ids: PriceIds::default(),
            default_paid_tier: PlanTier::Basic,
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> Self {
        let default_paid_tier = match non_empty_env("BILLING_DEFAULT_PAID_TIER") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring BILLING_DEFAULT_PAID_TIER, using basic");
                PlanTier::Basic
            }),
            None => PlanTier::Basic,
        };

        Self {
            webhook_secret: non_empty_env("STRIPE_WEBHOOK_SECRET"),
            price_ids: PriceIds::from_env(),
            default_paid_tier,
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_reads_prices_and_default_tier() {
        std::env::set_var("STRIPE_PRICE_ID_BASIC", "price_basic");
        std::env::set_var("STRIPE_PRICE_ID_PREMIUM", "");
        std::env::set_var("BILLING_DEFAULT_PAID_TIER", "premium");

        let config = BillingConfig::from_env();
        assert_eq!(config.price_ids.basic.as_deref(), Some("price_basic"));
        assert_eq!(config.price_ids.premium, None);
        assert_eq!(config.default_paid_tier, PlanTier::Premium);

        std::env::remove_var("STRIPE_PRICE_ID_BASIC");
        std::env::remove_var("STRIPE_PRICE_ID_PREMIUM");
        std::env::remove_var("BILLING_DEFAULT_PAID_TIER");
    }

    #[test]
    #[serial]
    fn test_bad_default_tier_falls_back_to_basic() {
        std::env::set_var("BILLING_DEFAULT_PAID_TIER", "platinum");
        assert_eq!(BillingConfig::from_env().default_paid_tier, PlanTier::Basic);
        std::env::remove_var("BILLING_DEFAULT_PAID_TIER");
    }
}
