//! Edge Case Tests for Authentication System
//!
//! Tests boundary conditions in:
//! - JWT expiry around the validation leeway
//! - Header and cookie parsing

#[cfg(test)]
mod jwt_tests {
    use super::super::jwt::{Claims, JwtManager};
    use time::OffsetDateTime;
    use uuid::Uuid;

    const SECRET: &str = "test-jwt-secret-key-for-testing-only";

    fn token_expiring_in(manager: &JwtManager, seconds: i64) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        manager
            .encode_claims(&Claims {
                sub: Uuid::new_v4(),
                username: "sora".to_string(),
                iat: now - 60,
                exp: now + seconds,
            })
            .unwrap()
    }

    // =========================================================================
    // Token about to expire is still valid
    // =========================================================================
    #[test]
    fn test_token_near_expiry_valid() {
        let manager = JwtManager::new(SECRET, 24);
        assert!(manager.validate_access_token(&token_expiring_in(&manager, 5)).is_ok());
    }

    // =========================================================================
    // Expired inside the 60 s leeway: still valid; well past it: rejected
    // =========================================================================
    #[test]
    fn test_expiry_leeway() {
        let manager = JwtManager::new(SECRET, 24);
        assert!(manager.validate_access_token(&token_expiring_in(&manager, -10)).is_ok());
        assert!(manager.validate_access_token(&token_expiring_in(&manager, -600)).is_err());
    }

    // =========================================================================
    // Tampered payload segment fails signature check
    // =========================================================================
    #[test]
    fn test_tampered_token_rejected() {
        let manager = JwtManager::new(SECRET, 24);
        let token = manager.generate_access_token(Uuid::new_v4(), "sora").unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1] = format!("{}A", parts[1]);
        assert!(manager.validate_access_token(&parts.join(".")).is_err());
    }
}

#[cfg(test)]
mod header_tests {
    use super::super::jwt::JwtManager;
    use super::super::middleware::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use brewlog_shared::{Account, AccountStore, InMemoryStore, PlanTier, Store};
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "test-jwt-secret-key-for-testing-only";

    async fn setup() -> (Router, String) {
        let store = Arc::new(InMemoryStore::new());
        let account = Account::new("sora", "sora@example.com", PlanTier::Basic);
        store.insert_account(&account).await.unwrap();
        let dyn_store: Arc<dyn Store> = store;
        let state = AuthState {
            jwt_manager: JwtManager::new(SECRET, 24),
            store: dyn_store,
        };
        let token = state
            .jwt_manager
            .generate_access_token(account.id, &account.username)
            .unwrap();
        let router = Router::new()
            .route("/me", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, require_auth));
        (router, token)
    }

    async fn status_with(router: Router, name: header::HeaderName, value: String) -> StatusCode {
        router
            .oneshot(Request::get("/me").header(name, value).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    // =========================================================================
    // Scheme is case-sensitive and must be followed by a space
    // =========================================================================
    #[tokio::test]
    async fn test_wrong_scheme_rejected() {
        let (router, token) = setup().await;
        assert_eq!(
            status_with(router.clone(), header::AUTHORIZATION, format!("bearer {token}")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_with(router, header::AUTHORIZATION, format!("Bearer{token}")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    // =========================================================================
    // Similarly named cookie is not mistaken for the auth cookie
    // =========================================================================
    #[tokio::test]
    async fn test_cookie_name_must_match_exactly() {
        let (router, token) = setup().await;
        assert_eq!(
            status_with(
                router.clone(),
                header::COOKIE,
                format!("brewlog_auth_token_old={token}")
            )
            .await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_with(
                router,
                header::COOKIE,
                format!("brewlog_auth_token_old=x; brewlog_auth_token={token}")
            )
            .await,
            StatusCode::OK
        );
    }
}
