//! Stripe event payloads
//!
//! Only the fields the router needs are modelled. Unknown fields are ignored
//! and unknown statuses deserialize to [`SubscriptionStatus::Unknown`], so new
//! Stripe API versions do not break parsing.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoicePaymentFailed,
    Other,
}

impl StripeEvent {
    pub fn kind(&self) -> EventKind {
        match self.type_.as_str() {
            "checkout.session.completed" => EventKind::CheckoutSessionCompleted,
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.paid" => EventKind::InvoicePaid,
            "invoice.payment_failed" => EventKind::InvoicePaymentFailed,
            _ => EventKind::Other,
        }
    }

    /// Deserialize `data.object` into the expected object type
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}

/// A reference that Stripe may send either as an id or as an expanded object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Terminal states that revoke the paid plan
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled
                | SubscriptionStatus::Unpaid
                | SubscriptionStatus::IncompleteExpired
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<Price>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub customer: Option<Expandable>,
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: Expandable,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: List<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceDetails {
    pub price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinePricing {
    pub price_details: Option<PriceDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    pub price: Option<Price>,
    /// Newer API versions move the price under `pricing.price_details`
    pub pricing: Option<LinePricing>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InvoiceLine {
    pub fn price_id(&self) -> Option<&str> {
        self.price.as_ref().map(|p| p.id.as_str()).or_else(|| {
            self.pricing
                .as_ref()
                .and_then(|p| p.price_details.as_ref())
                .and_then(|d| d.price.as_deref())
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionDetails {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer: Option<Expandable>,
    pub subscription: Option<Expandable>,
    pub amount_paid: Option<i64>,
    pub amount_due: Option<i64>,
    pub currency: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub attempt_count: Option<u32>,
    pub subscription_details: Option<SubscriptionDetails>,
    #[serde(default)]
    pub lines: List<InvoiceLine>,
}

/// Metadata keys that may carry a tier name
const TIER_METADATA_KEYS: [&str; 2] = ["plan_type", "tier"];

fn tier_from_metadata(metadata: &HashMap<String, String>) -> Option<String> {
    TIER_METADATA_KEYS
        .iter()
        .find_map(|k| metadata.get(*k))
        .filter(|v| !v.trim().is_empty())
        .cloned()
}

/// Provider-neutral description of a subscription state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanChange {
    pub customer_ref: String,
    pub new_status: SubscriptionStatus,
    pub new_tier: Option<String>,
    pub price_ref: Option<String>,
}

impl Subscription {
    pub fn to_plan_change(&self) -> PlanChange {
        PlanChange {
            customer_ref: self.customer.id().to_string(),
            new_status: self.status,
            new_tier: tier_from_metadata(&self.metadata),
            price_ref: self
                .items
                .data
                .iter()
                .find_map(|i| i.price.as_ref().map(|p| p.id.clone())),
        }
    }
}

impl Invoice {
    /// A paid invoice implies an active subscription
    pub fn to_plan_change(&self) -> Option<PlanChange> {
        let customer_ref = self.customer.as_ref()?.id().to_string();
        let new_tier = self
            .subscription_details
            .as_ref()
            .and_then(|d| tier_from_metadata(&d.metadata))
            .or_else(|| self.lines.data.iter().find_map(|l| tier_from_metadata(&l.metadata)));
        Some(PlanChange {
            customer_ref,
            new_status: SubscriptionStatus::Active,
            new_tier,
            price_ref: self
                .lines
                .data
                .iter()
                .find_map(|l| l.price_id().map(str::to_string)),
        })
    }
}
