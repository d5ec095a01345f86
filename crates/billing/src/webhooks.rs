//! Stripe webhook handling
//!
//! Translates payment-provider events into tier changes. For every change the
//! handler runs the downgrade reconciler, persists the new tier and hands the
//! result to the notifier. It holds no quota logic of its own.

use brewlog_shared::{Account, AccountStore, PlanTier, Store, WebhookClaim, WebhookEventStore};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::{dispatch_detached, Notification, Notifier, PaymentNotice, PlanChangeNotice};
use crate::error::{BillingError, BillingResult};
use crate::events::{
    CheckoutSession, EventKind, Invoice, PlanChange, StripeEvent, Subscription, SubscriptionStatus,
};
use crate::plans::PlanCatalog;
use crate::reconcile::{DowngradeReconciler, ReconcileOutcome};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, as Stripe computes `v1`
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("invalid webhook secret".into()))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) at time `now`
pub fn verify_signature(secret: &str, payload: &str, header: &str, now: i64) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp,
            now,
            diff = (now - timestamp).abs(),
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{timestamp}.{payload}");
    let matched = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(signed_payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    });

    if !matched {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }
    Ok(())
}

/// What a plan change means for the stored tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierDecision {
    Set(PlanTier),
    Keep,
}

/// Tier for an active subscription: metadata, then price lookup, then the default
pub fn resolve_paid_tier(catalog: &PlanCatalog, change: &PlanChange) -> PlanTier {
    if let Some(tier) = explicit_paid_tier(catalog, change) {
        return tier;
    }

    let fallback = catalog.default_paid_tier();
    tracing::warn!(
        customer = %change.customer_ref,
        price = ?change.price_ref,
        fallback = %fallback,
        "Could not resolve tier for subscription, using default paid tier"
    );
    fallback
}

/// Tier named by metadata or a mapped price, without any fallback
pub fn explicit_paid_tier(catalog: &PlanCatalog, change: &PlanChange) -> Option<PlanTier> {
    if let Some(raw) = &change.new_tier {
        match raw.parse::<PlanTier>() {
            Ok(tier) => return Some(tier),
            Err(e) => tracing::warn!(
                customer = %change.customer_ref,
                error = %e,
                "Ignoring unrecognised tier in metadata"
            ),
        }
    }
    change
        .price_ref
        .as_deref()
        .and_then(|price| catalog.tier_for_price(price))
}

pub fn decide_tier(catalog: &PlanCatalog, change: &PlanChange) -> TierDecision {
    match change.new_status {
        status if status.is_terminal() => TierDecision::Set(PlanTier::Free),
        status if status.is_active() => TierDecision::Set(resolve_paid_tier(catalog, change)),
        SubscriptionStatus::PastDue => {
            tracing::warn!(
                customer = %change.customer_ref,
                "Subscription is past due, keeping current tier"
            );
            TierDecision::Keep
        }
        other => {
            tracing::info!(
                customer = %change.customer_ref,
                status = ?other,
                "Subscription status does not change the tier"
            );
            TierDecision::Keep
        }
    }
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    catalog: Arc<PlanCatalog>,
    store: Arc<dyn Store>,
    reconciler: Arc<DowngradeReconciler>,
    notifier: Arc<dyn Notifier>,
    webhook_secret: Option<String>,
}

impl WebhookHandler {
    pub fn new(
        catalog: Arc<PlanCatalog>,
        store: Arc<dyn Store>,
        reconciler: Arc<DowngradeReconciler>,
        notifier: Arc<dyn Notifier>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            reconciler,
            notifier,
            webhook_secret,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_secret.is_some()
    }

    /// Verify the signature and parse the event
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<StripeEvent> {
        self.verify_event_at(payload, signature, OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn verify_event_at(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> BillingResult<StripeEvent> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| BillingError::NotConfigured("STRIPE_WEBHOOK_SECRET is not set".into()))?;
        verify_signature(secret, payload, signature, now)?;

        let event: StripeEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::InvalidPayload(e.to_string())
        })?;
        tracing::debug!(event_type = %event.type_, event_id = %event.id, "Webhook verified");
        Ok(event)
    }

    /// Handle a verified event exactly once.
    ///
    /// The event id is claimed before processing and the outcome recorded
    /// after. Duplicates of a processed event are acknowledged without work;
    /// failed events stay claimable so a redelivery retries them.
    pub async fn handle_event(&self, event: StripeEvent) -> BillingResult<()> {
        match self
            .store
            .claim_webhook_event(&event.id, &event.type_)
            .await?
        {
            WebhookClaim::Claimed => {}
            WebhookClaim::Duplicate(status) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.type_,
                    status = %status,
                    "Duplicate webhook event, skipping"
                );
                return Ok(());
            }
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.type_,
            "Processing Stripe webhook event"
        );
        let result = self.process_event_internal(&event).await;
        let error_message = result.as_ref().err().map(|e| e.to_string());

        if let Err(e) = self
            .store
            .finish_webhook_event(&event.id, error_message.as_deref())
            .await
        {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "Failed to record webhook result, retrying"
            );
            if let Err(retry_err) = self
                .store
                .finish_webhook_event(&event.id, error_message.as_deref())
                .await
            {
                tracing::error!(
                    event_id = %event.id,
                    first_error = %e,
                    retry_error = %retry_err,
                    "Failed to record webhook result after retry; event may stay in processing"
                );
            }
        }

        result
    }

    async fn process_event_internal(&self, event: &StripeEvent) -> BillingResult<()> {
        match event.kind() {
            EventKind::CheckoutSessionCompleted => self.handle_checkout_completed(event).await,
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
                self.handle_subscription_change(event, false).await
            }
            EventKind::SubscriptionDeleted => self.handle_subscription_change(event, true).await,
            EventKind::InvoicePaid => self.handle_invoice_paid(event).await,
            EventKind::InvoicePaymentFailed => self.handle_invoice_payment_failed(event).await,
            EventKind::Other => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: &StripeEvent) -> BillingResult<()> {
        let session: CheckoutSession = parse_object(event)?;
        let customer = session
            .customer
            .as_ref()
            .map(|c| c.id().to_string())
            .ok_or_else(|| {
                BillingError::InvalidPayload("checkout session without customer".into())
            })?;
        let raw_user = session
            .metadata
            .get("user_id")
            .or(session.client_reference_id.as_ref())
            .ok_or_else(|| {
                BillingError::InvalidPayload("checkout session without user_id".into())
            })?;
        let user_id = Uuid::parse_str(raw_user)
            .map_err(|e| BillingError::InvalidPayload(format!("bad user_id {raw_user:?}: {e}")))?;

        if !self.store.link_stripe_customer(user_id, &customer).await? {
            return Err(BillingError::AccountNotFound(user_id));
        }
        tracing::info!(
            user_id = %user_id,
            customer = %customer,
            session_id = %session.id,
            "Linked Stripe customer to account"
        );
        Ok(())
    }

    async fn handle_subscription_change(
        &self,
        event: &StripeEvent,
        deleted: bool,
    ) -> BillingResult<()> {
        let subscription: Subscription = parse_object(event)?;
        let mut change = subscription.to_plan_change();
        if deleted {
            change.new_status = SubscriptionStatus::Canceled;
        }
        tracing::info!(
            subscription_id = %subscription.id,
            customer = %change.customer_ref,
            status = ?change.new_status,
            "Subscription changed"
        );
        self.apply_plan_change(&change).await.map(|_| ())
    }

    async fn handle_invoice_paid(&self, event: &StripeEvent) -> BillingResult<()> {
        let invoice: Invoice = parse_object(event)?;
        let change = invoice
            .to_plan_change()
            .ok_or_else(|| BillingError::InvalidPayload("invoice without customer".into()))?;
        let account = self.account_for_customer(&change.customer_ref).await?;

        // A paid invoice confirms the current plan. It only lifts a free
        // account, and only to a tier named by metadata or a mapped price.
        let current = self.catalog.resolve_tier(&account.plan_tier);
        match explicit_paid_tier(&self.catalog, &change) {
            Some(tier) if !current.is_paid() => {
                self.apply_tier_change(&account, tier).await?;
            }
            resolved => tracing::debug!(
                user_id = %account.id,
                current_tier = %current,
                invoice_tier = ?resolved,
                "Invoice paid, keeping current tier"
            ),
        }

        tracing::info!(user_id = %account.id, invoice_id = %invoice.id, "Invoice paid");
        dispatch_detached(
            self.notifier.clone(),
            Notification::PaymentSucceeded(payment_notice(&account, &invoice, invoice.amount_paid)),
        );
        Ok(())
    }

    async fn handle_invoice_payment_failed(&self, event: &StripeEvent) -> BillingResult<()> {
        let invoice: Invoice = parse_object(event)?;
        let customer = invoice
            .customer
            .as_ref()
            .map(|c| c.id().to_string())
            .ok_or_else(|| BillingError::InvalidPayload("invoice without customer".into()))?;
        let account = self.account_for_customer(&customer).await?;

        tracing::warn!(
            user_id = %account.id,
            invoice_id = %invoice.id,
            attempt_count = ?invoice.attempt_count,
            "Invoice payment failed"
        );
        dispatch_detached(
            self.notifier.clone(),
            Notification::PaymentFailed(payment_notice(&account, &invoice, invoice.amount_due)),
        );
        Ok(())
    }

    /// Apply a provider-neutral plan change to the account owning `customer_ref`
    pub async fn apply_plan_change(
        &self,
        change: &PlanChange,
    ) -> BillingResult<Option<ReconcileOutcome>> {
        let account = self.account_for_customer(&change.customer_ref).await?;
        match decide_tier(&self.catalog, change) {
            TierDecision::Set(tier) => self.apply_tier_change(&account, tier).await.map(Some),
            TierDecision::Keep => Ok(None),
        }
    }

    /// Reconcile the collections, persist `new_tier` and queue a notification.
    ///
    /// The tier is written only after reconciliation succeeds, so a failure at
    /// either step leaves the stored tier unchanged and a redelivered event
    /// replays the whole transition. Reconciliation is id-based and safe to
    /// repeat.
    pub async fn apply_tier_change(
        &self,
        account: &Account,
        new_tier: PlanTier,
    ) -> BillingResult<ReconcileOutcome> {
        let old_tier = self.catalog.resolve_tier(&account.plan_tier);
        if old_tier == new_tier {
            tracing::debug!(user_id = %account.id, tier = %new_tier, "Tier unchanged");
            return Ok(ReconcileOutcome::default());
        }

        let outcome = self
            .reconciler
            .reconcile(account.id, old_tier, new_tier)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    user_id = %account.id,
                    old_tier = %old_tier,
                    new_tier = %new_tier,
                    error = %e,
                    "Reconciliation failed, tier left unchanged"
                );
            })?;

        self.store
            .set_plan_tier(account.id, new_tier)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    user_id = %account.id,
                    new_tier = %new_tier,
                    error = %e,
                    "Failed to persist new tier after reconciliation"
                );
            })?;

        tracing::info!(
            user_id = %account.id,
            old_tier = %old_tier,
            new_tier = %new_tier,
            deleted_presets = outcome.deleted_preset_count,
            deleted_shares = outcome.deleted_share_count,
            "Plan tier changed"
        );

        dispatch_detached(
            self.notifier.clone(),
            Notification::PlanChanged(PlanChangeNotice {
                user_ref: account.id,
                username: account.username.clone(),
                email: account.email.clone(),
                old_tier,
                new_tier,
                deleted_preset_count: outcome.deleted_preset_count,
                deleted_share_count: outcome.deleted_share_count,
            }),
        );

        Ok(outcome)
    }

    async fn account_for_customer(&self, customer: &str) -> BillingResult<Account> {
        self.store
            .find_by_stripe_customer(customer)
            .await?
            .ok_or_else(|| {
                tracing::warn!(customer = %customer, "No account linked to Stripe customer");
                BillingError::CustomerNotFound(customer.to_string())
            })
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(event: &StripeEvent) -> BillingResult<T> {
    event.object().map_err(|e| {
        tracing::error!(
            event_id = %event.id,
            event_type = %event.type_,
            error = %e,
            "Malformed event object"
        );
        BillingError::InvalidPayload(e.to_string())
    })
}

fn payment_notice(
    account: &Account,
    invoice: &Invoice,
    amount_cents: Option<i64>,
) -> PaymentNotice {
    PaymentNotice {
        user_ref: account.id,
        username: account.username.clone(),
        email: account.email.clone(),
        amount_cents,
        currency: invoice.currency.clone(),
        invoice_url: invoice.hosted_invoice_url.clone(),
    }
}
