//! In-memory store
//!
//! Implements every storage trait over a single mutex-guarded state, so each
//! call is atomic with respect to the others. Used by tests and local runs
//! without a database. Faults can be injected to exercise error paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::recipe::{NewRecipe, Recipe, RecipeId};
use crate::store::{
    AccountStore, QuotaUsage, RecipeStore, WebhookClaim, WebhookEventStore,
    WEBHOOK_PROCESSING_TIMEOUT_MINUTES,
};
use crate::types::{Account, PlanTier, SortOrder, UserId, Visibility};

#[derive(Debug, Clone)]
struct WebhookEventEntry {
    status: String,
    error: Option<String>,
    started_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct Inner {
    last_recipe_id: RecipeId,
    recipes: BTreeMap<RecipeId, Recipe>,
    accounts: HashMap<UserId, Account>,
    webhook_events: HashMap<String, WebhookEventEntry>,
}

impl Inner {
    fn owned(&self, owner: UserId, visibility: Visibility) -> impl DoubleEndedIterator<Item = &Recipe> {
        self.recipes
            .values()
            .filter(move |r| r.owner_id == owner && r.visibility == visibility)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
    fail_tier_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every count/list call fail with [`StoreError::Unavailable`]
    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Make every delete fail with [`StoreError::Unavailable`]
    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    /// Make every plan tier write fail with [`StoreError::Unavailable`]
    pub fn fail_tier_writes(&self, on: bool) {
        self.fail_tier_writes.store(on, Ordering::SeqCst);
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn check_deletes(&self) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected delete failure".into()));
        }
        Ok(())
    }

    /// Overwrite the raw stored tier, bypassing [`PlanTier`] parsing
    pub async fn set_raw_plan_tier(&self, id: UserId, raw: &str) {
        if let Some(account) = self.inner.lock().await.accounts.get_mut(&id) {
            account.plan_tier = raw.to_string();
        }
    }

    /// Stored status and error message of a webhook event
    pub async fn webhook_event_status(&self, event_id: &str) -> Option<(String, Option<String>)> {
        self.inner
            .lock()
            .await
            .webhook_events
            .get(event_id)
            .map(|e| (e.status.clone(), e.error.clone()))
    }

    /// Move a share's expiry, used to simulate time passing
    pub async fn set_share_expiry(&self, id: RecipeId, expires_at: OffsetDateTime) {
        if let Some(recipe) = self.inner.lock().await.recipes.get_mut(&id) {
            recipe.expires_at = Some(expires_at);
        }
    }
}

#[async_trait]
impl RecipeStore for InMemoryStore {
    async fn count(&self, owner: UserId, visibility: Visibility) -> StoreResult<u64> {
        self.check_reads()?;
        Ok(self.inner.lock().await.owned(owner, visibility).count() as u64)
    }

    async fn list_ids_by_creation(
        &self,
        owner: UserId,
        visibility: Visibility,
        order: SortOrder,
    ) -> StoreResult<Vec<RecipeId>> {
        self.check_reads()?;
        let inner = self.inner.lock().await;
        let mut ids: Vec<RecipeId> = inner.owned(owner, visibility).map(|r| r.id).collect();
        if order == SortOrder::Descending {
            ids.reverse();
        }
        Ok(ids)
    }

    async fn delete_by_ids(&self, owner: UserId, ids: &[RecipeId]) -> StoreResult<u64> {
        self.check_deletes()?;
        let mut inner = self.inner.lock().await;
        let mut deleted = 0;
        for id in ids {
            if inner.recipes.get(id).is_some_and(|r| r.owner_id == owner) {
                inner.recipes.remove(id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_newest_beyond(
        &self,
        owner: UserId,
        visibility: Visibility,
        keep: u64,
    ) -> StoreResult<u64> {
        self.check_reads()?;
        self.check_deletes()?;
        let mut inner = self.inner.lock().await;
        let newest_first: Vec<RecipeId> =
            inner.owned(owner, visibility).map(|r| r.id).rev().collect();
        let excess = newest_first.len().saturating_sub(keep as usize);
        for id in &newest_first[..excess] {
            inner.recipes.remove(id);
        }
        Ok(excess as u64)
    }

    async fn insert_recipe(&self, recipe: NewRecipe) -> StoreResult<Recipe> {
        let mut inner = self.inner.lock().await;
        inner.last_recipe_id += 1;
        let stored = Recipe {
            id: inner.last_recipe_id,
            owner_id: recipe.owner_id,
            visibility: recipe.visibility,
            name: recipe.name,
            is_ice: recipe.is_ice,
            ice_g: recipe.ice_g,
            bean_g: recipe.bean_g,
            water_ml: recipe.water_ml,
            memo: recipe.memo,
            access_token: recipe.access_token,
            expires_at: recipe.expires_at,
            created_at: OffsetDateTime::now_utc(),
            steps: recipe.steps,
        };
        inner.recipes.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_recipe(&self, owner: UserId, id: RecipeId) -> StoreResult<Option<Recipe>> {
        self.check_reads()?;
        let inner = self.inner.lock().await;
        Ok(inner.recipes.get(&id).filter(|r| r.owner_id == owner).cloned())
    }

    async fn list_recipes(
        &self,
        owner: UserId,
        visibility: Visibility,
    ) -> StoreResult<Vec<Recipe>> {
        self.check_reads()?;
        Ok(self
            .inner
            .lock()
            .await
            .owned(owner, visibility)
            .cloned()
            .collect())
    }

    async fn update_recipe(
        &self,
        owner: UserId,
        id: RecipeId,
        recipe: NewRecipe,
    ) -> StoreResult<Option<Recipe>> {
        let mut inner = self.inner.lock().await;
        let Some(existing) = inner.recipes.get_mut(&id).filter(|r| r.owner_id == owner) else {
            return Ok(None);
        };
        existing.name = recipe.name;
        existing.is_ice = recipe.is_ice;
        existing.ice_g = recipe.ice_g;
        existing.bean_g = recipe.bean_g;
        existing.water_ml = recipe.water_ml;
        existing.memo = recipe.memo;
        existing.steps = recipe.steps;
        Ok(Some(existing.clone()))
    }

    async fn get_shared_by_token(&self, token: &str) -> StoreResult<Option<Recipe>> {
        self.check_reads()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .recipes
            .values()
            .find(|r| {
                r.visibility == Visibility::Shared && r.access_token.as_deref() == Some(token)
            })
            .cloned())
    }

    async fn delete_expired_shares(&self, now: OffsetDateTime) -> StoreResult<u64> {
        self.check_deletes()?;
        let mut inner = self.inner.lock().await;
        let before = inner.recipes.len();
        inner
            .recipes
            .retain(|_, r| !(r.visibility == Visibility::Shared && r.is_expired_at(now)));
        Ok((before - inner.recipes.len()) as u64)
    }

    async fn count_expired_shares(&self, now: OffsetDateTime) -> StoreResult<u64> {
        self.check_reads()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .recipes
            .values()
            .filter(|r| r.visibility == Visibility::Shared && r.is_expired_at(now))
            .count() as u64)
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: UserId) -> StoreResult<Option<Account>> {
        self.check_reads()?;
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn find_by_stripe_customer(&self, customer_id: &str) -> StoreResult<Option<Account>> {
        self.check_reads()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .values()
            .find(|a| a.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn link_stripe_customer(&self, id: UserId, customer_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.accounts.get_mut(&id) {
            Some(account) => {
                account.stripe_customer_id = Some(customer_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_plan_tier(&self, id: UserId, tier: PlanTier) -> StoreResult<()> {
        if self.fail_tier_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected tier write failure".into()));
        }
        if let Some(account) = self.inner.lock().await.accounts.get_mut(&id) {
            account.plan_tier = tier.as_str().to_string();
        }
        Ok(())
    }

    async fn deactivate_account(&self, id: UserId, at: OffsetDateTime) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.accounts.get_mut(&id) {
            Some(account) if account.is_active => {
                account.is_active = false;
                account.deactivated_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_deactivated_before(&self, cutoff: OffsetDateTime) -> StoreResult<u64> {
        self.check_deletes()?;
        let mut inner = self.inner.lock().await;
        let doomed: Vec<UserId> = inner
            .accounts
            .values()
            .filter(|a| !a.is_active && a.deactivated_at.is_some_and(|at| at < cutoff))
            .map(|a| a.id)
            .collect();
        for id in &doomed {
            inner.accounts.remove(id);
        }
        inner.recipes.retain(|_, r| !doomed.contains(&r.owner_id));
        Ok(doomed.len() as u64)
    }

    async fn quota_usage(&self) -> StoreResult<Vec<QuotaUsage>> {
        self.check_reads()?;
        let inner = self.inner.lock().await;
        let mut usage: Vec<QuotaUsage> = inner
            .accounts
            .values()
            .map(|a| QuotaUsage {
                user_id: a.id,
                plan_tier: a.plan_tier.clone(),
                preset_count: inner.owned(a.id, Visibility::Private).count() as u64,
                share_count: inner.owned(a.id, Visibility::Shared).count() as u64,
            })
            .collect();
        usage.sort_by_key(|u| u.user_id);
        Ok(usage)
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryStore {
    async fn claim_webhook_event(
        &self,
        event_id: &str,
        _event_type: &str,
    ) -> StoreResult<WebhookClaim> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.webhook_events.get(event_id) {
            let stale_before = now - Duration::minutes(WEBHOOK_PROCESSING_TIMEOUT_MINUTES);
            let stuck = existing.status == "processing" && existing.started_at < stale_before;
            if existing.status != "error" && !stuck {
                return Ok(WebhookClaim::Duplicate(existing.status.clone()));
            }
        }
        inner.webhook_events.insert(
            event_id.to_string(),
            WebhookEventEntry {
                status: "processing".to_string(),
                error: None,
                started_at: now,
            },
        );
        Ok(WebhookClaim::Claimed)
    }

    async fn finish_webhook_event(&self, event_id: &str, error: Option<&str>) -> StoreResult<()> {
        if let Some(entry) = self.inner.lock().await.webhook_events.get_mut(event_id) {
            entry.status = if error.is_some() { "error" } else { "success" }.to_string();
            entry.error = error.map(str::to_string);
        }
        Ok(())
    }
}
