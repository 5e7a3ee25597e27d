//! Authentication middleware for Axum

use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use super::jwt::{JwtError, JwtManager};

/// Cookie carrying the access token for browser clients
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Cookie carrying the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Authenticated identity extracted from the access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub token_id: Uuid,
}

/// State needed for authentication
///
/// Only the access-token keys; the gate does no I/O.
#[derive(Clone, Debug)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

/// Value of cookie `name` from the request's `Cookie` headers
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

/// Token from `Authorization: Bearer <token>`
pub fn extract_authorization_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// Extract bearer token from Authorization header or the access token cookie
/// Prefers the Authorization header; the cookie serves browser clients
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    extract_authorization_bearer(headers).or_else(|| extract_cookie(headers, ACCESS_TOKEN_COOKIE))
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = extract_bearer_token(request.headers()) else {
        tracing::warn!(path = %path, "require_auth: no token in header or cookie");
        return AuthError::MissingAuth.into_response();
    };

    match authenticate_jwt(&auth_state, &token) {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                token_id = %auth_user.token_id,
                "require_auth: authentication successful"
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

/// Middleware that optionally authenticates (for public endpoints that benefit from auth)
pub async fn optional_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_bearer_token(request.headers()) {
        if let Ok(auth_user) = authenticate_jwt(&auth_state, &token) {
            request.extensions_mut().insert(auth_user);
        }
    }

    next.run(request).await
}

fn authenticate_jwt(auth_state: &AuthState, token: &str) -> Result<AuthUser, AuthError> {
    let payload = auth_state
        .jwt_manager
        .validate_access_token(token)
        .map_err(|e| {
            tracing::debug!(
                token_prefix = %token.get(..12).unwrap_or(token),
                error = %e,
                "authenticate_jwt: validation failed"
            );
            AuthError::from(e)
        })?;

    Ok(AuthUser {
        user_id: payload.user_id,
        email: payload.email,
        token_id: payload.token_id,
    })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<AuthUser>().cloned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Invalid token: {0}")]
    InvalidToken(JwtError),
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        if e.is_expired() {
            AuthError::ExpiredToken
        } else {
            AuthError::InvalidToken(e)
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::ExpiredToken => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::InvalidToken(_) => (StatusCode::FORBIDDEN, "Invalid token"),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
