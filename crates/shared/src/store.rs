//! Storage traits
//!
//! The billing engine and the API only talk to persistence through these
//! traits. [`crate::PgStore`] is the production implementation and
//! [`crate::InMemoryStore`] backs the tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::StoreResult;
use crate::recipe::{NewRecipe, Recipe, RecipeId};
use crate::types::{Account, PlanTier, SortOrder, UserId, Visibility};

#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// Number of recipes `owner` holds in the given collection
    async fn count(&self, owner: UserId, visibility: Visibility) -> StoreResult<u64>;

    /// Recipe ids of one collection, ordered by creation
    async fn list_ids_by_creation(
        &self,
        owner: UserId,
        visibility: Visibility,
        order: SortOrder,
    ) -> StoreResult<Vec<RecipeId>>;

    /// Delete the given recipes (and their steps) owned by `owner`.
    ///
    /// Ids that no longer exist are skipped, so the call is safe to repeat.
    /// Returns the number of recipes actually removed.
    async fn delete_by_ids(&self, owner: UserId, ids: &[RecipeId]) -> StoreResult<u64>;

    /// Keep the `keep` oldest recipes of a collection and delete the rest.
    ///
    /// Candidates are selected before anything is deleted. Implementations
    /// backed by a database should override this to run the selection and the
    /// delete in one transaction.
    async fn delete_newest_beyond(
        &self,
        owner: UserId,
        visibility: Visibility,
        keep: u64,
    ) -> StoreResult<u64> {
        let newest_first = self
            .list_ids_by_creation(owner, visibility, SortOrder::Descending)
            .await?;
        let excess = newest_first.len().saturating_sub(keep as usize);
        if excess == 0 {
            return Ok(0);
        }
        self.delete_by_ids(owner, &newest_first[..excess]).await
    }

    async fn insert_recipe(&self, recipe: NewRecipe) -> StoreResult<Recipe>;

    /// Fetch a recipe owned by `owner`
    async fn get_recipe(&self, owner: UserId, id: RecipeId) -> StoreResult<Option<Recipe>>;

    /// All recipes of one collection, oldest first
    async fn list_recipes(&self, owner: UserId, visibility: Visibility)
        -> StoreResult<Vec<Recipe>>;

    /// Replace the body and steps of an owned recipe
    async fn update_recipe(
        &self,
        owner: UserId,
        id: RecipeId,
        recipe: NewRecipe,
    ) -> StoreResult<Option<Recipe>>;

    async fn get_shared_by_token(&self, token: &str) -> StoreResult<Option<Recipe>>;

    /// Delete shares whose expiry is before `now`
    async fn delete_expired_shares(&self, now: OffsetDateTime) -> StoreResult<u64>;

    async fn count_expired_shares(&self, now: OffsetDateTime) -> StoreResult<u64>;
}

/// Per-user collection sizes joined with the stored tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub user_id: UserId,
    pub plan_tier: String,
    pub preset_count: u64,
    pub share_count: u64,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    async fn get_account(&self, id: UserId) -> StoreResult<Option<Account>>;

    async fn find_by_stripe_customer(&self, customer_id: &str) -> StoreResult<Option<Account>>;

    /// Returns false when the account does not exist
    async fn link_stripe_customer(&self, id: UserId, customer_id: &str) -> StoreResult<bool>;

    async fn set_plan_tier(&self, id: UserId, tier: PlanTier) -> StoreResult<()>;

    async fn deactivate_account(&self, id: UserId, at: OffsetDateTime) -> StoreResult<bool>;

    /// Remove accounts deactivated before `cutoff` together with their recipes
    async fn purge_deactivated_before(&self, cutoff: OffsetDateTime) -> StoreResult<u64>;

    async fn quota_usage(&self) -> StoreResult<Vec<QuotaUsage>>;
}

/// Outcome of trying to take ownership of an incoming webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookClaim {
    Claimed,
    /// Already handled, or being handled elsewhere; carries the stored status
    Duplicate(String),
}

/// Events stuck in "processing" longer than this may be claimed again
pub const WEBHOOK_PROCESSING_TIMEOUT_MINUTES: i64 = 30;

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Claim `event_id` for processing.
    ///
    /// New events and events whose previous attempt failed are claimable, as
    /// are events stuck in processing past the timeout.
    async fn claim_webhook_event(&self, event_id: &str, event_type: &str)
        -> StoreResult<WebhookClaim>;

    async fn finish_webhook_event(&self, event_id: &str, error: Option<&str>) -> StoreResult<()>;
}

/// Everything the services need from persistence
pub trait Store: RecipeStore + AccountStore + WebhookEventStore {}

impl<T> Store for T where T: RecipeStore + AccountStore + WebhookEventStore {}
