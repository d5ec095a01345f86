//! Account lifecycle

use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use brewlog_shared::AccountStore;
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Deactivate the caller's account; the worker purges it after the grace period
pub async fn deactivate_account(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<StatusCode> {
    let deactivated = state
        .store
        .deactivate_account(auth_user.user_id, OffsetDateTime::now_utc())
        .await?;
    if !deactivated {
        return Err(ApiError::NotFound("Account"));
    }
    tracing::info!(user_id = %auth_user.user_id, "Account deactivated");
    Ok(StatusCode::NO_CONTENT)
}
