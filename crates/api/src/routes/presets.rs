//! Preset routes: the private recipe collection

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use brewlog_shared::{Recipe, RecipeDraft, RecipeId, RecipeStore, Visibility};

use super::{ensure_quota, shares::ShareResponse};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// List own presets, oldest first
pub async fn list_presets(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Recipe>>> {
    let presets = state
        .store
        .list_recipes(auth_user.user_id, Visibility::Private)
        .await?;
    Ok(Json(presets))
}

pub async fn create_preset(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(draft): Json<RecipeDraft>,
) -> ApiResult<(StatusCode, Json<Recipe>)> {
    ensure_quota(&state, &auth_user.account, Visibility::Private).await?;

    let new = draft.into_new_recipe(auth_user.user_id, Visibility::Private)?;
    let preset = state.store.insert_recipe(new).await?;
    tracing::info!(user_id = %auth_user.user_id, preset_id = preset.id, "Preset created");
    Ok((StatusCode::CREATED, Json(preset)))
}

pub async fn get_preset(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<RecipeId>,
) -> ApiResult<Json<Recipe>> {
    Ok(Json(owned_preset(&state, &auth_user, id).await?))
}

pub async fn update_preset(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<RecipeId>,
    Json(draft): Json<RecipeDraft>,
) -> ApiResult<Json<Recipe>> {
    owned_preset(&state, &auth_user, id).await?;

    let new = draft.into_new_recipe(auth_user.user_id, Visibility::Private)?;
    let updated = state
        .store
        .update_recipe(auth_user.user_id, id, new)
        .await?
        .ok_or(ApiError::NotFound("Preset"))?;
    Ok(Json(updated))
}

pub async fn delete_preset(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<RecipeId>,
) -> ApiResult<StatusCode> {
    owned_preset(&state, &auth_user, id).await?;
    state.store.delete_by_ids(auth_user.user_id, &[id]).await?;
    tracing::info!(user_id = %auth_user.user_id, preset_id = id, "Preset deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Publish a copy of a preset as a share
pub async fn share_preset(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<RecipeId>,
) -> ApiResult<(StatusCode, Json<ShareResponse>)> {
    let preset = owned_preset(&state, &auth_user, id).await?;
    ensure_quota(&state, &auth_user.account, Visibility::Shared).await?;

    let new = preset
        .to_draft()
        .into_new_recipe(auth_user.user_id, Visibility::Shared)?
        .with_expiry_days(state.config.share_expiry_days);
    let share = state.store.insert_recipe(new).await?;
    tracing::info!(
        user_id = %auth_user.user_id,
        preset_id = id,
        share_id = share.id,
        "Preset shared"
    );
    Ok((StatusCode::CREATED, Json(ShareResponse::new(&state, share)?)))
}

async fn owned_preset(state: &AppState, auth_user: &AuthUser, id: RecipeId) -> ApiResult<Recipe> {
    state
        .store
        .get_recipe(auth_user.user_id, id)
        .await?
        .filter(|r| r.visibility == Visibility::Private)
        .ok_or(ApiError::NotFound("Preset"))
}
