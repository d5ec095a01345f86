//! Billing notifications
//!
//! The engine hands structured facts to a [`Notifier`]; message bodies are
//! rendered here. Delivery happens on a detached task after the triggering
//! change has committed, and a failed delivery is only logged.

use async_trait::async_trait;
use brewlog_shared::{PlanTier, UserId};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::non_empty_env;
use crate::error::{BillingError, BillingResult};

/// Facts about a tier change, including what the reconciler removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanChangeNotice {
    pub user_ref: UserId,
    pub username: String,
    pub email: String,
    pub old_tier: PlanTier,
    pub new_tier: PlanTier,
    pub deleted_preset_count: u64,
    pub deleted_share_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentNotice {
    pub user_ref: UserId,
    pub username: String,
    pub email: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub invoice_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    PlanChanged(PlanChangeNotice),
    PaymentSucceeded(PaymentNotice),
    PaymentFailed(PaymentNotice),
}

impl Notification {
    fn label(&self) -> &'static str {
        match self {
            Notification::PlanChanged(_) => "plan_changed",
            Notification::PaymentSucceeded(_) => "payment_succeeded",
            Notification::PaymentFailed(_) => "payment_failed",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn plan_changed(&self, notice: &PlanChangeNotice) -> BillingResult<()>;
    async fn payment_succeeded(&self, notice: &PaymentNotice) -> BillingResult<()>;
    async fn payment_failed(&self, notice: &PaymentNotice) -> BillingResult<()>;

    async fn deliver(&self, notification: &Notification) -> BillingResult<()> {
        match notification {
            Notification::PlanChanged(n) => self.plan_changed(n).await,
            Notification::PaymentSucceeded(n) => self.payment_succeeded(n).await,
            Notification::PaymentFailed(n) => self.payment_failed(n).await,
        }
    }
}

/// Fire-and-forget delivery. Errors are logged, never returned.
pub fn dispatch_detached(
    notifier: Arc<dyn Notifier>,
    notification: Notification,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.deliver(&notification).await {
            tracing::error!(
                notification = notification.label(),
                error = %e,
                "Failed to deliver billing notification"
            );
        }
    })
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from_address: String,
    /// Resend API base URL
    pub api_base_url: String,
    /// Public site URL used for links in messages
    pub app_base_url: String,
    pub max_retries: usize,
    /// Backoff base; successive delays are base, base^2, base^3 ms
    pub retry_base_ms: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from_address: "Brewlog <noreply@brewlog.app>".to_string(),
            api_base_url: "https://api.resend.com".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
            max_retries: 3,
            retry_base_ms: 10,
        }
    }
}

impl EmailConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: non_empty_env("RESEND_API_KEY"),
            from_address: non_empty_env("EMAIL_FROM").unwrap_or(defaults.from_address),
            api_base_url: non_empty_env("RESEND_API_URL").unwrap_or(defaults.api_base_url),
            app_base_url: non_empty_env("PUBLIC_BASE_URL").unwrap_or(defaults.app_base_url),
            ..defaults
        }
    }
}

#[derive(Debug, Error)]
enum SendFailure {
    #[error("transient: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Permanent(String),
}

impl SendFailure {
    fn is_transient(&self) -> bool {
        matches!(self, SendFailure::Transient(_))
    }
}

/// Plain-text message ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub text: String,
}

pub fn render_plan_changed(notice: &PlanChangeNotice) -> EmailMessage {
    let mut text = format!(
        "Hi {},\n\nYour Brewlog plan changed from {} to {}.\n",
        notice.username, notice.old_tier, notice.new_tier
    );
    if notice.deleted_preset_count > 0 || notice.deleted_share_count > 0 {
        text.push_str(&format!(
            "\nTo fit the limits of your new plan we removed your {} newest preset(s) \
             and {} newest shared recipe(s). Your oldest recipes were kept.\n",
            notice.deleted_preset_count, notice.deleted_share_count
        ));
    }
    text.push_str("\nThank you for brewing with Brewlog.\n");
    EmailMessage {
        subject: "Your Brewlog plan has changed".to_string(),
        text,
    }
}

pub fn render_payment_succeeded(notice: &PaymentNotice) -> EmailMessage {
    EmailMessage {
        subject: "Payment received".to_string(),
        text: format!(
            "Hi {},\n\nThank you for using Brewlog.\n\n\
             The payment for your subscription{} has completed.\n\n\
             We look forward to brewing with you.\n",
            notice.username,
            format_amount(notice)
        ),
    }
}

pub fn render_payment_failed(notice: &PaymentNotice, app_base_url: &str) -> EmailMessage {
    let mut text = format!(
        "Hi {},\n\nThank you for using Brewlog.\n\n\
         The payment for your subscription{} failed.\n\
         Please check your card details and try again. You can update them from your page:\n\n\
         {}/mypage\n",
        notice.username,
        format_amount(notice),
        app_base_url.trim_end_matches('/')
    );
    if let Some(url) = &notice.invoice_url {
        text.push_str(&format!("\nInvoice: {url}\n"));
    }
    EmailMessage {
        subject: "Payment failed".to_string(),
        text,
    }
}

fn format_amount(notice: &PaymentNotice) -> String {
    match (notice.amount_cents, &notice.currency) {
        (Some(cents), Some(currency)) => format!(
            " ({}.{:02} {})",
            cents / 100,
            cents % 100,
            currency.to_uppercase()
        ),
        _ => String::new(),
    }
}

/// Sends billing email through the Resend API
#[derive(Clone)]
pub struct BillingEmailService {
    client: reqwest::Client,
    config: EmailConfig,
}

impl BillingEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn send(&self, to: &str, message: EmailMessage) -> BillingResult<()> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| BillingError::NotConfigured("RESEND_API_KEY is not set".into()))?;
        let url = format!("{}/emails", self.config.api_base_url.trim_end_matches('/'));
        let body = json!({
            "from": self.config.from_address,
            "to": [to],
            "subject": message.subject,
            "text": message.text,
        });

        let strategy = ExponentialBackoff::from_millis(self.config.retry_base_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::spawn(
            strategy,
            || self.post_once(&url, api_key, &body),
            |e: &SendFailure| e.is_transient(),
        )
        .await
        .map_err(|e| BillingError::Email(e.to_string()))?;

        tracing::info!(to = %to, subject = %message.subject, "Billing email sent");
        Ok(())
    }

    async fn post_once(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<(), SendFailure> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| SendFailure::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        tracing::warn!(status = %status, detail = %detail, "Email API returned an error");
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(SendFailure::Transient(format!("{status}: {detail}")))
        } else {
            Err(SendFailure::Permanent(format!("{status}: {detail}")))
        }
    }
}

#[async_trait]
impl Notifier for BillingEmailService {
    async fn plan_changed(&self, notice: &PlanChangeNotice) -> BillingResult<()> {
        self.send(&notice.email, render_plan_changed(notice)).await
    }

    async fn payment_succeeded(&self, notice: &PaymentNotice) -> BillingResult<()> {
        self.send(&notice.email, render_payment_succeeded(notice)).await
    }

    async fn payment_failed(&self, notice: &PaymentNotice) -> BillingResult<()> {
        self.send(
            &notice.email,
            render_payment_failed(notice, &self.config.app_base_url),
        )
        .await
    }
}

/// Notifier used when no email provider is configured
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn plan_changed(&self, notice: &PlanChangeNotice) -> BillingResult<()> {
        tracing::info!(
            user_id = %notice.user_ref,
            old_tier = %notice.old_tier,
            new_tier = %notice.new_tier,
            deleted_presets = notice.deleted_preset_count,
            deleted_shares = notice.deleted_share_count,
            "Plan change notification (email disabled)"
        );
        Ok(())
    }

    async fn payment_succeeded(&self, notice: &PaymentNotice) -> BillingResult<()> {
        tracing::info!(user_id = %notice.user_ref, "Payment success notification (email disabled)");
        Ok(())
    }

    async fn payment_failed(&self, notice: &PaymentNotice) -> BillingResult<()> {
        tracing::info!(user_id = %notice.user_ref, "Payment failure notification (email disabled)");
        Ok(())
    }
}

/// Pick the email notifier when an API key is configured, otherwise log only
pub fn notifier_from_config(config: EmailConfig) -> Arc<dyn Notifier> {
    if config.api_key.is_some() {
        Arc::new(BillingEmailService::new(config))
    } else {
        tracing::warn!("RESEND_API_KEY not set - billing emails will only be logged");
        Arc::new(LogNotifier)
    }
}

/// Keeps every notification in memory; optionally fails each delivery
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<Notification>>,
    fail: bool,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Poll until at least `count` notifications arrived or `timeout` passed
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, notification: Notification) -> BillingResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification);
        if self.fail {
            return Err(BillingError::Email("recording notifier set to fail".into()));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn plan_changed(&self, notice: &PlanChangeNotice) -> BillingResult<()> {
        self.record(Notification::PlanChanged(notice.clone()))
    }

    async fn payment_succeeded(&self, notice: &PaymentNotice) -> BillingResult<()> {
        self.record(Notification::PaymentSucceeded(notice.clone()))
    }

    async fn payment_failed(&self, notice: &PaymentNotice) -> BillingResult<()> {
        self.record(Notification::PaymentFailed(notice.clone()))
    }
}
