//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub type UserId = Uuid;

/// Subscription tier governing preset and share quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Basic,
    Premium,
    Unlimited,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [
        PlanTier::Free,
        PlanTier::Basic,
        PlanTier::Premium,
        PlanTier::Unlimited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Basic => "basic",
            PlanTier::Premium => "premium",
            PlanTier::Unlimited => "unlimited",
        }
    }

    /// Whether the tier is backed by a paid subscription
    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plan tier: {0:?}")]
pub struct UnknownTier(pub String);

impl FromStr for PlanTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "basic" => Ok(PlanTier::Basic),
            "premium" => Ok(PlanTier::Premium),
            "unlimited" => Ok(PlanTier::Unlimited),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// Which collection a recipe belongs to.
///
/// `Private` recipes are presets, `Shared` recipes are published under an
/// access token. Both are counted against separate quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Shared,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Shared => "shared",
        }
    }

    /// User-facing collection name ("preset" or "share")
    pub fn kind(&self) -> &'static str {
        match self {
            Visibility::Private => "preset",
            Visibility::Shared => "share",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "shared" => Ok(Visibility::Shared),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A registered user.
///
/// `plan_tier` is kept as the raw stored value so that an unrecognised tier
/// is resolved by the plan catalog (fail-closed) instead of at decode time.
/// Preset and share counts are never cached here; they are always counted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub plan_tier: String,
    pub stripe_customer_id: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deactivated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Account {
    /// Build a fresh, active account on the given tier
    pub fn new(username: impl Into<String>, email: impl Into<String>, tier: PlanTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            plan_tier: tier.as_str().to_string(),
            stripe_customer_id: None,
            is_active: true,
            deactivated_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
