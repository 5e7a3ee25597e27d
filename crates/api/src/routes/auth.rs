//! Authentication routes
//!
//! Tokens are returned in the JSON body and mirrored into HttpOnly cookies, so
//! both API clients and browsers can use the same endpoints.

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{
        extract_authorization_bearer, extract_bearer_token, extract_cookie, AuthUser,
        ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Non-HttpOnly marker so browser code can tell it is signed in
const LOGGED_IN_COOKIE: &str = "logged_in";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Seconds until the access token expires
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
}

// =============================================================================
// Cookies
// =============================================================================

fn cookie(
    name: &str,
    value: &str,
    max_age: u64,
    http_only: bool,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; SameSite=Lax; Max-Age={max_age}");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn set_cookies(
    headers: &mut HeaderMap,
    cookies: &[(&str, &str, u64, bool)],
    secure: bool,
) -> ApiResult<()> {
    for (name, value, max_age, http_only) in cookies {
        let value = cookie(name, value, *max_age, *http_only, secure)
            .map_err(|e| ApiError::internal("cookie encoding", e))?;
        headers.append(SET_COOKIE, value);
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let identity = state
        .auth_service
        .register(&req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: identity.id,
            email: identity.email,
        }),
    ))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<Response> {
    let tokens = state
        .auth_service
        .login(&req.email, &req.password)
        .await
        .map_err(|e| {
            if state.config.unify_login_errors {
                e.unify_login_failure()
            } else {
                e
            }
        })?;

    let access_max_age = tokens.access.time_to_live.as_secs();
    let refresh_max_age = tokens.refresh.time_to_live.as_secs();

    let mut headers = HeaderMap::new();
    set_cookies(
        &mut headers,
        &[
            (ACCESS_TOKEN_COOKIE, tokens.access.token.as_str(), access_max_age, true),
            (REFRESH_TOKEN_COOKIE, tokens.refresh.token.as_str(), refresh_max_age, true),
            (LOGGED_IN_COOKIE, "true", access_max_age, false),
        ],
        state.config.cookie_secure,
    )?;

    let body = LoginResponse {
        access_token: tokens.access.token,
        refresh_token: tokens.refresh.token,
        token_type: "Bearer",
        expires_in: access_max_age,
    };
    Ok((headers, Json(body)).into_response())
}

/// POST /api/v1/auth/refresh
///
/// The refresh token is read from the JSON body, then `Authorization: Bearer`,
/// then the `refresh_token` cookie.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let request: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))?
    };

    let refresh_token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| extract_authorization_bearer(&headers))
        .or_else(|| extract_cookie(&headers, REFRESH_TOKEN_COOKIE))
        .ok_or_else(|| ApiError::Validation("Refresh token is required".to_string()))?;

    let access = state.auth_service.refresh(&refresh_token).await?;
    let access_max_age = access.time_to_live.as_secs();

    let mut response_headers = HeaderMap::new();
    set_cookies(
        &mut response_headers,
        &[
            (ACCESS_TOKEN_COOKIE, access.token.as_str(), access_max_age, true),
            (LOGGED_IN_COOKIE, "true", access_max_age, false),
        ],
        state.config.cookie_secure,
    )?;

    let body = RefreshResponse {
        access_token: access.token,
        token_type: "Bearer",
        expires_in: access_max_age,
    };
    Ok((response_headers, Json(body)).into_response())
}

/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<(StatusCode, HeaderMap)> {
    state.auth_service.logout(&auth_user.email).await?;
    tracing::info!(user_id = %auth_user.user_id, "User logged out");

    // Always clear the cookies, even if the session record was already gone
    let mut headers = HeaderMap::new();
    set_cookies(
        &mut headers,
        &[
            (ACCESS_TOKEN_COOKIE, "", 0, true),
            (REFRESH_TOKEN_COOKIE, "", 0, true),
            (LOGGED_IN_COOKIE, "", 0, false),
        ],
        state.config.cookie_secure,
    )?;
    Ok((StatusCode::NO_CONTENT, headers))
}

/// GET /api/v1/auth/validate
///
/// Like the gate, plus a check that the session has not been closed.
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ValidateResponse>> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| ApiError::Validation("Access token is required".to_string()))?;
    let payload = state.auth_service.verify_session(&token).await?;
    Ok(Json(ValidateResponse {
        user_id: payload.user_id,
    }))
}

/// GET /api/v1/auth/me
pub async fn me(auth_user: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: auth_user.user_id,
        email: auth_user.email,
    })
}
