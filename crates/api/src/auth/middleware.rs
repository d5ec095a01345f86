//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use brewlog_shared::{Account, AccountStore, Store, UserId};
use serde_json::json;
use std::sync::Arc;

use super::jwt::JwtManager;

/// Cookie set by the web client when it keeps the token out of script reach
const AUTH_COOKIE: &str = "brewlog_auth_token";

/// Authenticated account loaded by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub account: Account,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub store: Arc<dyn Store>,
}

fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(str::trim)
                .find_map(|c| c.strip_prefix(AUTH_COOKIE)?.strip_prefix('='))
                .map(str::to_string)
        })
}

/// Bearer token from the Authorization header, falling back to the auth cookie
fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    extract_token_from_cookie(request)
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => authenticate_jwt(&auth_state, &token).await,
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                "require_auth: authenticated"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

async fn authenticate_jwt(auth_state: &AuthState, token: &str) -> Result<AuthUser, AuthError> {
    let claims = auth_state.jwt_manager.validate_access_token(token)?;

    let account = auth_state
        .store
        .get_account(claims.sub)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %claims.sub, error = %e, "Failed to load account");
            AuthError::DatabaseError
        })?
        .ok_or_else(|| {
            tracing::warn!(user_id = %claims.sub, "Token refers to an unknown account");
            AuthError::InvalidToken
        })?;

    if !account.is_active {
        tracing::warn!(user_id = %account.id, "Token refers to a deactivated account");
        return Err(AuthError::AccountDeactivated);
    }

    Ok(AuthUser {
        user_id: account.id,
        account,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Account is deactivated")]
    AccountDeactivated,
    #[error("Database error")]
    DatabaseError,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::AccountDeactivated => (StatusCode::UNAUTHORIZED, "Account is deactivated"),
            AuthError::DatabaseError | AuthError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
