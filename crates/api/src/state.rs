//! Application state

use brewlog_billing::BillingService;
use brewlog_shared::{PgStore, Store};
use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: BillingService,
}

impl AppState {
    /// Postgres-backed state with billing configured from the environment
    pub fn new(pool: PgPool, config: Config) -> Self {
        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

        let billing = BillingService::from_env(store.clone());
        if billing.webhooks.is_configured() {
            tracing::info!("Stripe webhook handling enabled");
        } else {
            tracing::warn!("Stripe webhooks not configured (missing STRIPE_WEBHOOK_SECRET)");
        }

        Self::with_parts(store, config, billing)
    }

    pub fn with_parts(store: Arc<dyn Store>, config: Config, billing: BillingService) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            store,
            config,
            jwt_manager,
            billing,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            store: self.store.clone(),
        }
    }

    /// Public link for a share token
    pub fn share_url(&self, token: &str) -> String {
        format!("{}/shared/{token}", self.config.public_base_url)
    }
}
