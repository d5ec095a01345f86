//! Current plan and usage

use axum::{
    extract::{Extension, State},
    Json,
};
use brewlog_billing::UNLIMITED;
use brewlog_shared::{PlanTier, Visibility};
use serde::Serialize;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub tier: PlanTier,
    /// `None` when the tier has no limit
    pub preset_limit: Option<u32>,
    pub share_limit: Option<u32>,
    pub preset_count: u64,
    pub share_count: u64,
    pub has_pip_access: bool,
}

fn finite(limit: u32) -> Option<u32> {
    (limit != UNLIMITED).then_some(limit)
}

pub async fn get_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<PlanResponse>> {
    let catalog = &state.billing.catalog;
    let tier = catalog.resolve_tier(&auth_user.account.plan_tier);
    let limits = catalog.limits_for(tier);

    let quota = &state.billing.quota;
    let presets = quota.usage(&auth_user.account, Visibility::Private).await?;
    let shares = quota.usage(&auth_user.account, Visibility::Shared).await?;

    Ok(Json(PlanResponse {
        tier,
        preset_limit: finite(presets.limit),
        share_limit: finite(shares.limit),
        preset_count: presets.used,
        share_count: shares.used,
        has_pip_access: limits.has_extra_feature,
    }))
}
