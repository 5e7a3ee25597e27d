//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Token extraction (header, cookie, precedence)
//! - Status mapping (missing 401, expired 401, invalid 403)
//! - AuthUser extraction in handlers
//! - optional_auth pass-through

#[cfg(test)]
mod tests {
    use super::super::jwt::test_keys::{jwt_manager, FOREIGN_PRIVATE, FOREIGN_PUBLIC};
    use super::super::jwt::{JwtManager, Subject, TokenKeys, TokenType};
    use super::super::middleware::*;
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderMap, HeaderValue, Request, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use time::OffsetDateTime;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn alice() -> Subject {
        Subject {
            user_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
        }
    }

    async fn whoami(user: AuthUser) -> Json<Value> {
        Json(json!({ "email": user.email, "user_id": user.user_id }))
    }

    async fn maybe_whoami(user: Option<AuthUser>) -> Json<Value> {
        Json(json!({ "email": user.map(|u| u.email) }))
    }

    /// Router with one gated route and one optionally authenticated route
    fn app(jwt_manager: JwtManager) -> Router {
        let state = AuthState { jwt_manager };
        Router::new()
            .route("/protected", get(whoami))
            .route_layer(from_fn_with_state(state.clone(), require_auth))
            .merge(
                Router::new()
                    .route("/public", get(maybe_whoami))
                    .route_layer(from_fn_with_state(state, optional_auth)),
            )
    }

    async fn send(app: Router, uri: &str, headers: &[(&str, String)]) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // =========================================================================
    // Token extraction
    // =========================================================================

    #[test]
    fn test_extract_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("theme=dark; access_token=abc.def.ghi; refresh_token=xyz"),
        );
        assert_eq!(
            extract_cookie(&headers, "access_token").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(extract_cookie(&headers, "refresh_token").as_deref(), Some("xyz"));
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_extract_cookie_ignores_empty_value() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("access_token="));
        assert_eq!(extract_cookie(&headers, "access_token"), None);
    }

    #[test]
    fn test_extract_authorization_requires_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_authorization_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer tok"));
        assert_eq!(extract_authorization_bearer(&headers).as_deref(), Some("tok"));
    }

    // =========================================================================
    // require_auth
    // =========================================================================

    #[tokio::test]
    async fn test_valid_bearer_attaches_identity() {
        let jwt = jwt_manager();
        let subject = alice();
        let access = jwt.generate_access_token(&subject).unwrap();

        let (status, body) = send(
            app(jwt),
            "/protected",
            &[("authorization", format!("Bearer {}", access.token))],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "alice@example.com");
        assert_eq!(body["user_id"], subject.user_id.to_string());
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let (status, body) = send(app(jwt_manager()), "/protected", &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
    }

    #[tokio::test]
    async fn test_garbage_bearer_is_403_not_401() {
        let (status, body) = send(
            app(jwt_manager()),
            "/protected",
            &[("authorization", "Bearer garbage".to_string())],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Invalid token");
    }

    #[tokio::test]
    async fn test_expired_token_is_401() {
        let jwt = jwt_manager();
        let stale = jwt
            .access_keys()
            .issue_at(&alice(), OffsetDateTime::now_utc() - time::Duration::hours(1))
            .unwrap();

        let (status, body) = send(
            app(jwt),
            "/protected",
            &[("authorization", format!("Bearer {}", stale.token))],
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Token expired");
    }

    #[tokio::test]
    async fn test_foreign_signature_is_403() {
        let foreign = TokenKeys::from_pem(
            TokenType::Access,
            FOREIGN_PRIVATE.as_bytes(),
            FOREIGN_PUBLIC.as_bytes(),
            Duration::from_secs(900),
        )
        .unwrap();
        let forged = foreign.issue(&alice()).unwrap();

        let (status, _) = send(
            app(jwt_manager()),
            "/protected",
            &[("authorization", format!("Bearer {}", forged.token))],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let jwt = jwt_manager();
        let refresh = jwt.generate_refresh_token(&alice()).unwrap();

        let (status, _) = send(
            app(jwt),
            "/protected",
            &[("authorization", format!("Bearer {}", refresh.token))],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_cookie_only_is_accepted() {
        let jwt = jwt_manager();
        let access = jwt.generate_access_token(&alice()).unwrap();

        let (status, body) = send(
            app(jwt),
            "/protected",
            &[("cookie", format!("access_token={}", access.token))],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_header_takes_precedence_over_cookie() {
        let jwt = jwt_manager();
        let access = jwt.generate_access_token(&alice()).unwrap();

        // a valid cookie does not rescue a bad header
        let (status, _) = send(
            app(jwt.clone()),
            "/protected",
            &[
                ("authorization", "Bearer garbage".to_string()),
                ("cookie", format!("access_token={}", access.token)),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            app(jwt),
            "/protected",
            &[
                ("authorization", format!("Bearer {}", access.token)),
                ("cookie", "access_token=garbage".to_string()),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // =========================================================================
    // optional_auth
    // =========================================================================

    #[tokio::test]
    async fn test_optional_auth_passes_through_without_token() {
        let (status, body) = send(app(jwt_manager()), "/public", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["email"].is_null());
    }

    #[tokio::test]
    async fn test_optional_auth_ignores_bad_token() {
        let (status, body) = send(
            app(jwt_manager()),
            "/public",
            &[("authorization", "Bearer garbage".to_string())],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["email"].is_null());
    }

    #[tokio::test]
    async fn test_optional_auth_attaches_valid_identity() {
        let jwt = jwt_manager();
        let access = jwt.generate_access_token(&alice()).unwrap();

        let (status, body) = send(
            app(jwt),
            "/public",
            &[("authorization", format!("Bearer {}", access.token))],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "alice@example.com");
    }
}
