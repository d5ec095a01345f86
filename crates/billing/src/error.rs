//! Billing error types

use brewlog_shared::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("No account linked to customer {0}")]
    CustomerNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Billing not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Email delivery failed: {0}")]
    Email(String),
}

impl BillingError {
    /// Whether the payment provider should redeliver the event that caused this
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Store(_))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
