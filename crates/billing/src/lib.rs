// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries store errors by value
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Brewlog Billing Module
//!
//! Plan limits, quota checks and the reaction to payment events.
//!
//! ## Features
//!
//! - **Plan Catalog**: Per-tier preset and share limits, price to tier lookup
//! - **Quota Checks**: Allow or deny creating one more preset or share
//! - **Downgrade Reconciliation**: Trim collections to the new tier's limits
//! - **Webhooks**: Verify and route Stripe events to tier changes
//! - **Email Notifications**: Plan changed, payment succeeded, payment failed
//! - **Invariants**: Read-only checks that every account is within its limits

pub mod config;
pub mod email;
pub mod error;
pub mod events;
pub mod invariants;
pub mod plans;
pub mod quota;
pub mod reconcile;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

use brewlog_shared::Store;
use std::sync::Arc;

// Config
pub use config::{BillingConfig, PriceIds};

// Email
pub use email::{
    dispatch_detached, notifier_from_config, BillingEmailService, EmailConfig, LogNotifier,
    Notification, Notifier, PaymentNotice, PlanChangeNotice,
};
#[cfg(any(test, feature = "test-support"))]
pub use email::RecordingNotifier;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{PlanChange, StripeEvent, SubscriptionStatus};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantViolation, QuotaInvariantChecker, ViolationSeverity,
};

// Plans
pub use plans::{PlanCatalog, PlanLimits, UNLIMITED};

// Quota
pub use quota::{QuotaChecker, QuotaDecision, QuotaDenial, QuotaUsageSummary};

// Reconcile
pub use reconcile::{DowngradeReconciler, ReconcileOutcome};

// Webhooks
pub use webhooks::{
    decide_tier, explicit_paid_tier, sign_payload, verify_signature, TierDecision, WebhookHandler,
    SIGNATURE_TOLERANCE_SECS,
};

/// Combined billing service with all sub-services
#[derive(Clone)]
pub struct BillingService {
    pub catalog: Arc<PlanCatalog>,
    pub quota: Arc<QuotaChecker>,
    pub reconciler: Arc<DowngradeReconciler>,
    pub webhooks: Arc<WebhookHandler>,
    pub invariants: Arc<QuotaInvariantChecker>,
    pub notifier: Arc<dyn Notifier>,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(store: Arc<dyn Store>) -> Self {
        Self::new(BillingConfig::from_env(), EmailConfig::from_env(), store)
    }

    /// Create a new billing service with explicit config
    pub fn new(config: BillingConfig, email: EmailConfig, store: Arc<dyn Store>) -> Self {
        Self::with_notifier(config, store, notifier_from_config(email))
    }

    pub fn with_notifier(
        config: BillingConfig,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let catalog = Arc::new(PlanCatalog::from_config(&config));
        let reconciler = Arc::new(DowngradeReconciler::new(catalog.clone(), store.clone()));

        Self {
            quota: Arc::new(QuotaChecker::new(catalog.clone(), store.clone())),
            webhooks: Arc::new(WebhookHandler::new(
                catalog.clone(),
                store.clone(),
                reconciler.clone(),
                notifier.clone(),
                config.webhook_secret,
            )),
            invariants: Arc::new(QuotaInvariantChecker::new(catalog.clone(), store)),
            reconciler,
            notifier,
            catalog,
        }
    }
}
