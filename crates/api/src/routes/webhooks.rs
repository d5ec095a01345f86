//! Stripe webhook endpoint

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Verify and process a Stripe event.
///
/// Bad signatures and payloads answer 400, unknown customers 404 and store
/// faults 500. Stripe redelivers on any non-2xx response.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingSignature)?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;
    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
