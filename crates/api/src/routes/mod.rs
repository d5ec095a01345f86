//! HTTP routes

mod account;
mod convert;
mod plan;
mod presets;
mod shares;
mod webhooks;


use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use brewlog_billing::QuotaDecision;
use brewlog_shared::{Account, Visibility};
use serde_json::json;

use crate::{
    auth::require_auth,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/plan", get(plan::get_plan))
        .route("/api/presets", get(presets::list_presets).post(presets::create_preset))
        .route(
            "/api/presets/{id}",
            get(presets::get_preset)
                .put(presets::update_preset)
                .delete(presets::delete_preset),
        )
        .route("/api/presets/{id}/share", post(presets::share_preset))
        .route("/api/shares", get(shares::list_shares).post(shares::create_share))
        .route("/api/shares/{token}", axum::routing::delete(shares::delete_share))
        .route("/api/shared/{token}/add-to-presets", post(shares::add_to_presets))
        .route("/api/account", axum::routing::delete(account::deactivate_account))
        .route_layer(middleware::from_fn_with_state(state.auth_state(), require_auth));

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/shared/{token}", get(shares::get_shared))
        .route("/api/recipes/convert", post(convert::convert))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook));

    protected.merge(public).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Map a quota denial to the 429 response
pub(crate) async fn ensure_quota(
    state: &AppState,
    account: &Account,
    kind: Visibility,
) -> ApiResult<()> {
    match state.billing.quota.can_create(account, kind).await? {
        QuotaDecision::Allowed => Ok(()),
        QuotaDecision::Denied(denial) => Err(ApiError::QuotaExceeded(denial)),
    }
}
