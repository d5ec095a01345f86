//! Share routes: publicly readable recipes addressed by access token

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use brewlog_shared::{
    Recipe, RecipeDraft, RecipeId, RecipeStep, RecipeStore, StoreError, Visibility,
};
use serde::Serialize;
use time::OffsetDateTime;

use super::ensure_quota;
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub id: RecipeId,
    pub access_token: String,
    pub url: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl ShareResponse {
    pub fn new(state: &AppState, share: Recipe) -> ApiResult<Self> {
        let access_token = share
            .access_token
            .ok_or_else(|| StoreError::Corrupt(format!("share {} has no access token", share.id)))?;
        Ok(Self {
            id: share.id,
            url: state.share_url(&access_token),
            access_token,
            expires_at: share.expires_at,
        })
    }
}

/// Public view of a share; the owner is not exposed
#[derive(Debug, Serialize)]
pub struct SharedRecipeResponse {
    pub name: String,
    pub is_ice: bool,
    pub ice_g: Option<f64>,
    pub bean_g: f64,
    pub water_ml: f64,
    pub memo: Option<String>,
    pub steps: Vec<RecipeStep>,
    /// Water poured in each step
    pub pours: Vec<f64>,
    pub brew_ratio: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl From<Recipe> for SharedRecipeResponse {
    fn from(recipe: Recipe) -> Self {
        Self {
            pours: recipe.pour_volumes(),
            brew_ratio: recipe.brew_ratio(),
            name: recipe.name,
            is_ice: recipe.is_ice,
            ice_g: recipe.ice_g,
            bean_g: recipe.bean_g,
            water_ml: recipe.water_ml,
            memo: recipe.memo,
            steps: recipe.steps,
            expires_at: recipe.expires_at,
        }
    }
}

/// Share a recipe body directly, typically a converted recipe
pub async fn create_share(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(draft): Json<RecipeDraft>,
) -> ApiResult<(StatusCode, Json<ShareResponse>)> {
    ensure_quota(&state, &auth_user.account, Visibility::Shared).await?;

    let new = draft
        .into_new_recipe(auth_user.user_id, Visibility::Shared)?
        .with_expiry_days(state.config.share_expiry_days);
    let share = state.store.insert_recipe(new).await?;
    tracing::info!(user_id = %auth_user.user_id, share_id = share.id, "Share created");
    Ok((StatusCode::CREATED, Json(ShareResponse::new(&state, share)?)))
}

pub async fn list_shares(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Recipe>>> {
    let shares = state
        .store
        .list_recipes(auth_user.user_id, Visibility::Shared)
        .await?;
    Ok(Json(shares))
}

pub async fn delete_share(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    let share = state
        .store
        .get_shared_by_token(&token)
        .await?
        .filter(|s| s.owner_id == auth_user.user_id)
        .ok_or(ApiError::NotFound("Share"))?;

    state.store.delete_by_ids(auth_user.user_id, &[share.id]).await?;
    tracing::info!(user_id = %auth_user.user_id, share_id = share.id, "Share deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Public lookup by token
pub async fn get_shared(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<SharedRecipeResponse>> {
    let share = live_share(&state, &token).await?;
    Ok(Json(share.into()))
}

/// Copy someone's share into the caller's presets
pub async fn add_to_presets(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(token): Path<String>,
) -> ApiResult<(StatusCode, Json<Recipe>)> {
    let share = live_share(&state, &token).await?;
    ensure_quota(&state, &auth_user.account, Visibility::Private).await?;

    let new = share
        .to_draft()
        .into_new_recipe(auth_user.user_id, Visibility::Private)?;
    let preset = state.store.insert_recipe(new).await?;
    tracing::info!(
        user_id = %auth_user.user_id,
        share_id = share.id,
        preset_id = preset.id,
        "Share copied into presets"
    );
    Ok((StatusCode::CREATED, Json(preset)))
}

async fn live_share(state: &AppState, token: &str) -> ApiResult<Recipe> {
    let share = state
        .store
        .get_shared_by_token(token)
        .await?
        .ok_or(ApiError::NotFound("Share"))?;
    if share.is_expired_at(OffsetDateTime::now_utc()) {
        return Err(ApiError::Gone);
    }
    Ok(share)
}
