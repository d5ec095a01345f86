//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use brewlog_billing::{BillingError, QuotaDenial};
use brewlog_shared::{ConversionError, RecipeValidationError, StoreError, Visibility};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(&'static str),

    #[error("Share link has expired")]
    Gone,

    #[error("Quota exceeded")]
    QuotaExceeded(QuotaDenial),

    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),
}

impl From<RecipeValidationError> for ApiError {
    fn from(err: RecipeValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<ConversionError> for ApiError {
    fn from(err: ConversionError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

fn denial_body(denial: &QuotaDenial) -> serde_json::Value {
    let (code, noun) = match denial.kind {
        Visibility::Private => ("preset_limit_exceeded", "presets"),
        Visibility::Shared => ("share_limit_exceeded", "shared recipes"),
    };
    let message = if denial.is_paid_tier {
        format!(
            "Your {} plan allows up to {} {noun}. Delete one to make room.",
            denial.tier, denial.limit
        )
    } else {
        format!(
            "The free plan allows {} {noun}. Upgrade your plan to save more.",
            denial.limit
        )
    };
    json!({
        "error": code,
        "message": message,
        "limit": denial.limit,
        "current_count": denial.current_count,
        "is_premium": denial.is_paid_tier,
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::QuotaExceeded(denial) = &self {
            return (StatusCode::TOO_MANY_REQUESTS, Json(denial_body(denial))).into_response();
        }

        let (status, code, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ApiError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
            }
            ApiError::Gone => (StatusCode::GONE, "expired", self.to_string()),
            ApiError::MissingSignature => {
                (StatusCode::BAD_REQUEST, "invalid_signature", self.to_string())
            }
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
            ApiError::Billing(e) => match e {
                BillingError::WebhookSignatureInvalid => {
                    (StatusCode::BAD_REQUEST, "invalid_signature", e.to_string())
                }
                BillingError::InvalidPayload(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_payload", e.to_string())
                }
                BillingError::CustomerNotFound(_) | BillingError::AccountNotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", e.to_string())
                }
                BillingError::NotConfigured(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "not_configured",
                    "Webhooks are not configured".to_string(),
                ),
                BillingError::Store(_) | BillingError::Config(_) | BillingError::Email(_) => {
                    tracing::error!(error = %e, "Billing error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "Internal server error".to_string(),
                    )
                }
            },
            ApiError::QuotaExceeded(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "limit_exceeded",
                self.to_string(),
            ),
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brewlog_shared::PlanTier;

    fn denial(kind: Visibility, tier: PlanTier, limit: u32) -> QuotaDenial {
        QuotaDenial {
            kind,
            tier,
            limit,
            current_count: u64::from(limit),
            is_paid_tier: tier.is_paid(),
        }
    }

    #[test]
    fn test_quota_body_for_free_tier() {
        let body = denial_body(&denial(Visibility::Private, PlanTier::Free, 1));
        assert_eq!(body["error"], "preset_limit_exceeded");
        assert_eq!(body["limit"], 1);
        assert_eq!(body["current_count"], 1);
        assert_eq!(body["is_premium"], false);
        assert!(body["message"].as_str().unwrap().contains("Upgrade"));
    }

    #[test]
    fn test_quota_body_for_paid_tier() {
        let body = denial_body(&denial(Visibility::Shared, PlanTier::Premium, 10));
        assert_eq!(body["error"], "share_limit_exceeded");
        assert_eq!(body["is_premium"], true);
        assert!(body["message"].as_str().unwrap().contains("premium"));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("Preset"), StatusCode::NOT_FOUND),
            (ApiError::Gone, StatusCode::GONE),
            (
                ApiError::QuotaExceeded(denial(Visibility::Private, PlanTier::Free, 1)),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (ApiError::Billing(BillingError::WebhookSignatureInvalid), StatusCode::BAD_REQUEST),
            (
                ApiError::Billing(BillingError::CustomerNotFound("cus_1".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Billing(BillingError::Store(StoreError::Unavailable("down".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
