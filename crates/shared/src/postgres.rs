//! Postgres store
//!
//! Every multi-row mutation runs inside one transaction. Step rows are
//! deleted explicitly before their recipes; the schema has no cascade.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::error::{StoreError, StoreResult};
use crate::recipe::{NewRecipe, Recipe, RecipeId, RecipeStep};
use crate::store::{
    AccountStore, QuotaUsage, RecipeStore, WebhookClaim, WebhookEventStore,
    WEBHOOK_PROCESSING_TIMEOUT_MINUTES,
};
use crate::types::{Account, PlanTier, SortOrder, UserId, Visibility};

const RECIPE_COLUMNS: &str = "id, owner_id, visibility, name, is_ice, ice_g, bean_g, water_ml, \
                              memo, access_token, expires_at, created_at";

#[derive(Debug, FromRow)]
struct RecipeRow {
    id: i64,
    owner_id: UserId,
    visibility: String,
    name: String,
    is_ice: bool,
    ice_g: Option<f64>,
    bean_g: f64,
    water_ml: f64,
    memo: Option<String>,
    access_token: Option<String>,
    expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl RecipeRow {
    fn into_recipe(self, steps: Vec<RecipeStep>) -> StoreResult<Recipe> {
        let visibility = self
            .visibility
            .parse::<Visibility>()
            .map_err(|e| StoreError::Corrupt(format!("recipe {}: {e}", self.id)))?;
        Ok(Recipe {
            id: self.id,
            owner_id: self.owner_id,
            visibility,
            name: self.name,
            is_ice: self.is_ice,
            ice_g: self.ice_g,
            bean_g: self.bean_g,
            water_ml: self.water_ml,
            memo: self.memo,
            access_token: self.access_token,
            expires_at: self.expires_at,
            created_at: self.created_at,
            steps,
        })
    }
}

#[derive(Debug, FromRow)]
struct StepRow {
    recipe_id: i64,
    step_number: i32,
    minute: i32,
    seconds: i32,
    total_water_ml: f64,
}

#[derive(Debug, FromRow)]
struct QuotaUsageRow {
    user_id: UserId,
    plan_tier: String,
    preset_count: i64,
    share_count: i64,
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load steps for many recipes at once, grouped by recipe id
    async fn load_steps(
        &self,
        ids: &[RecipeId],
    ) -> StoreResult<HashMap<RecipeId, Vec<RecipeStep>>> {
        let rows: Vec<StepRow> = sqlx::query_as(
            r#"
            SELECT recipe_id, step_number, minute, seconds, total_water_ml
            FROM recipe_steps
            WHERE recipe_id = ANY($1)
            ORDER BY recipe_id, step_number
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<RecipeId, Vec<RecipeStep>> = HashMap::new();
        for row in rows {
            grouped.entry(row.recipe_id).or_default().push(RecipeStep {
                step_number: row.step_number,
                minute: row.minute,
                seconds: row.seconds,
                total_water_ml: row.total_water_ml,
            });
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<RecipeRow>) -> StoreResult<Vec<Recipe>> {
        let ids: Vec<RecipeId> = rows.iter().map(|r| r.id).collect();
        let mut steps = self.load_steps(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let s = steps.remove(&row.id).unwrap_or_default();
                row.into_recipe(s)
            })
            .collect()
    }

    async fn hydrate_one(&self, row: Option<RecipeRow>) -> StoreResult<Option<Recipe>> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

async fn insert_steps(
    tx: &mut Transaction<'_, Postgres>,
    recipe_id: RecipeId,
    steps: &[RecipeStep],
) -> StoreResult<()> {
    for step in steps {
        sqlx::query(
            r#"
            INSERT INTO recipe_steps (recipe_id, step_number, minute, seconds, total_water_ml)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(recipe_id)
        .bind(step.step_number)
        .bind(step.minute)
        .bind(step.seconds)
        .bind(step.total_water_ml)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Delete already-locked recipes and their steps, returning recipes removed
async fn delete_locked(tx: &mut Transaction<'_, Postgres>, ids: &[RecipeId]) -> StoreResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    sqlx::query("DELETE FROM recipe_steps WHERE recipe_id = ANY($1)")
        .bind(ids)
        .execute(&mut **tx)
        .await?;
    let result = sqlx::query("DELETE FROM recipes WHERE id = ANY($1)")
        .bind(ids)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl RecipeStore for PgStore {
    async fn count(&self, owner: UserId, visibility: Visibility) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recipes WHERE owner_id = $1 AND visibility = $2",
        )
        .bind(owner)
        .bind(visibility.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_ids_by_creation(
        &self,
        owner: UserId,
        visibility: Visibility,
        order: SortOrder,
    ) -> StoreResult<Vec<RecipeId>> {
        let sql = match order {
            SortOrder::Ascending => {
                "SELECT id FROM recipes WHERE owner_id = $1 AND visibility = $2 ORDER BY id ASC"
            }
            SortOrder::Descending => {
                "SELECT id FROM recipes WHERE owner_id = $1 AND visibility = $2 ORDER BY id DESC"
            }
        };
        Ok(sqlx::query_scalar(sql)
            .bind(owner)
            .bind(visibility.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete_by_ids(&self, owner: UserId, ids: &[RecipeId]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let owned: Vec<RecipeId> = sqlx::query_scalar(
            "SELECT id FROM recipes WHERE owner_id = $1 AND id = ANY($2) FOR UPDATE",
        )
        .bind(owner)
        .bind(ids)
        .fetch_all(&mut *tx)
        .await?;
        let deleted = delete_locked(&mut tx, &owned).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_newest_beyond(
        &self,
        owner: UserId,
        visibility: Visibility,
        keep: u64,
    ) -> StoreResult<u64> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;
        // Everything after the `keep` oldest rows, locked before deletion
        let doomed: Vec<RecipeId> = sqlx::query_scalar(
            r#"
            SELECT id FROM recipes
            WHERE owner_id = $1 AND visibility = $2
            ORDER BY id ASC
            OFFSET $3
            FOR UPDATE
            "#,
        )
        .bind(owner)
        .bind(visibility.as_str())
        .bind(keep)
        .fetch_all(&mut *tx)
        .await?;
        let deleted = delete_locked(&mut tx, &doomed).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn insert_recipe(&self, recipe: NewRecipe) -> StoreResult<Recipe> {
        let mut tx = self.pool.begin().await?;
        let row: RecipeRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO recipes
                (owner_id, visibility, name, is_ice, ice_g, bean_g, water_ml, memo,
                 access_token, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(recipe.owner_id)
        .bind(recipe.visibility.as_str())
        .bind(&recipe.name)
        .bind(recipe.is_ice)
        .bind(recipe.ice_g)
        .bind(recipe.bean_g)
        .bind(recipe.water_ml)
        .bind(&recipe.memo)
        .bind(&recipe.access_token)
        .bind(recipe.expires_at)
        .fetch_one(&mut *tx)
        .await?;
        insert_steps(&mut tx, row.id, &recipe.steps).await?;
        tx.commit().await?;
        row.into_recipe(recipe.steps)
    }

    async fn get_recipe(&self, owner: UserId, id: RecipeId) -> StoreResult<Option<Recipe>> {
        let row: Option<RecipeRow> = sqlx::query_as(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        self.hydrate_one(row).await
    }

    async fn list_recipes(
        &self,
        owner: UserId,
        visibility: Visibility,
    ) -> StoreResult<Vec<Recipe>> {
        let rows: Vec<RecipeRow> = sqlx::query_as(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes \
             WHERE owner_id = $1 AND visibility = $2 ORDER BY id"
        ))
        .bind(owner)
        .bind(visibility.as_str())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn update_recipe(
        &self,
        owner: UserId,
        id: RecipeId,
        recipe: NewRecipe,
    ) -> StoreResult<Option<Recipe>> {
        let mut tx = self.pool.begin().await?;
        let row: Option<RecipeRow> = sqlx::query_as(&format!(
            r#"
            UPDATE recipes
            SET name = $3, is_ice = $4, ice_g = $5, bean_g = $6, water_ml = $7, memo = $8
            WHERE id = $1 AND owner_id = $2
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(&recipe.name)
        .bind(recipe.is_ice)
        .bind(recipe.ice_g)
        .bind(recipe.bean_g)
        .bind(recipe.water_ml)
        .bind(&recipe.memo)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM recipe_steps WHERE recipe_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_steps(&mut tx, id, &recipe.steps).await?;
        tx.commit().await?;
        row.into_recipe(recipe.steps).map(Some)
    }

    async fn get_shared_by_token(&self, token: &str) -> StoreResult<Option<Recipe>> {
        let row: Option<RecipeRow> = sqlx::query_as(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE visibility = 'shared' AND access_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        self.hydrate_one(row).await
    }

    async fn delete_expired_shares(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let expired: Vec<RecipeId> = sqlx::query_scalar(
            "SELECT id FROM recipes WHERE visibility = 'shared' AND expires_at < $1 FOR UPDATE",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let deleted = delete_locked(&mut tx, &expired).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn count_expired_shares(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recipes WHERE visibility = 'shared' AND expires_at < $1",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, username, email, plan_tier, stripe_customer_id, is_active, deactivated_at, created_at";

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, username, email, plan_tier, stripe_customer_id,
                 is_active, deactivated_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.plan_tier)
        .bind(&account.stripe_customer_id)
        .bind(account.is_active)
        .bind(account.deactivated_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account(&self, id: UserId) -> StoreResult<Option<Account>> {
        Ok(
            sqlx::query_as(&format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_by_stripe_customer(&self, customer_id: &str) -> StoreResult<Option<Account>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE stripe_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn link_stripe_customer(&self, id: UserId, customer_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET stripe_customer_id = $2 WHERE id = $1")
            .bind(id)
            .bind(customer_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_plan_tier(&self, id: UserId, tier: PlanTier) -> StoreResult<()> {
        sqlx::query("UPDATE users SET plan_tier = $2 WHERE id = $1")
            .bind(id)
            .bind(tier.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_account(&self, id: UserId, at: OffsetDateTime) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_active = FALSE, deactivated_at = $2 WHERE id = $1 AND is_active",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_deactivated_before(&self, cutoff: OffsetDateTime) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let doomed: Vec<UserId> = sqlx::query_scalar(
            r#"
            SELECT id FROM users
            WHERE NOT is_active AND deactivated_at < $1
            FOR UPDATE
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;
        if doomed.is_empty() {
            return Ok(0);
        }

        let recipes: Vec<RecipeId> =
            sqlx::query_scalar("SELECT id FROM recipes WHERE owner_id = ANY($1) FOR UPDATE")
                .bind(&doomed)
                .fetch_all(&mut *tx)
                .await?;
        delete_locked(&mut tx, &recipes).await?;

        let result = sqlx::query("DELETE FROM users WHERE id = ANY($1)")
            .bind(&doomed)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn quota_usage(&self) -> StoreResult<Vec<QuotaUsage>> {
        let rows: Vec<QuotaUsageRow> = sqlx::query_as(
            r#"
            SELECT
                u.id AS user_id,
                u.plan_tier,
                COUNT(r.id) FILTER (WHERE r.visibility = 'private') AS preset_count,
                COUNT(r.id) FILTER (WHERE r.visibility = 'shared') AS share_count
            FROM users u
            LEFT JOIN recipes r ON r.owner_id = u.id
            GROUP BY u.id, u.plan_tier
            ORDER BY u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| QuotaUsage {
                user_id: row.user_id,
                plan_tier: row.plan_tier,
                preset_count: row.preset_count.max(0) as u64,
                share_count: row.share_count.max(0) as u64,
            })
            .collect())
    }
}

#[async_trait]
impl WebhookEventStore for PgStore {
    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> StoreResult<WebhookClaim> {
        // Atomic claim: only one caller gets a row back
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_events
                (event_id, event_type, processing_result, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE webhook_events.processing_result = 'error'
               OR (webhook_events.processing_result = 'processing'
                   AND webhook_events.processing_started_at < NOW() - make_interval(mins => $3))
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(WEBHOOK_PROCESSING_TIMEOUT_MINUTES as i32)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(WebhookClaim::Claimed);
        }

        let status: Option<String> = sqlx::query_scalar(
            "SELECT processing_result FROM webhook_events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(WebhookClaim::Duplicate(
            status.unwrap_or_else(|| "unknown".to_string()),
        ))
    }

    async fn finish_webhook_event(&self, event_id: &str, error: Option<&str>) -> StoreResult<()> {
        let result = if error.is_some() { "error" } else { "success" };
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processing_result = $2, error_message = $3, processed_at = NOW()
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(result)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
