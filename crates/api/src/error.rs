//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::auth::identity::IdentityError;
use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;
use crate::auth::sessions::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Identity not found")]
    IdentityNotFound,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Session expired")]
    SessionExpired,
    #[error("Invalid token: {0}")]
    InvalidToken(JwtError),
    #[error("Identity already exists")]
    AlreadyExists,
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidCredentials => StatusCode::BAD_REQUEST,
            ApiError::IdentityNotFound => StatusCode::NOT_FOUND,
            ApiError::SessionExpired => StatusCode::UNAUTHORIZED,
            ApiError::InvalidToken(e) if e.is_expired() => StatusCode::UNAUTHORIZED,
            ApiError::InvalidToken(_) => StatusCode::FORBIDDEN,
            ApiError::AlreadyExists => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Report an unknown email the same way as a wrong password
    pub fn unify_login_failure(self) -> Self {
        match self {
            ApiError::IdentityNotFound => ApiError::InvalidCredentials,
            other => other,
        }
    }

    /// Wrap an infrastructure failure with the operation it broke
    pub fn internal(operation: &str, cause: impl std::fmt::Display) -> Self {
        ApiError::Internal(format!("{}: {}", operation, cause))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Validation(msg) => msg.clone(),
            ApiError::InvalidToken(JwtError::Expired) => "Token expired".to_string(),
            ApiError::InvalidToken(_) => "Invalid token".to_string(),
            ApiError::Internal(cause) => {
                tracing::error!(error = %cause, "Internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<JwtError> for ApiError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::KeyFormat(_) | JwtError::Signing(_) => ApiError::internal("token issuance", e),
            other => ApiError::InvalidToken(other),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::NotFound => ApiError::IdentityNotFound,
            IdentityError::AlreadyExists => ApiError::AlreadyExists,
            IdentityError::Database(cause) => ApiError::internal("identity lookup", cause),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        ApiError::internal("password check", e)
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound | SessionError::Expired => ApiError::SessionExpired,
            other => ApiError::internal("session store", other),
        }
    }
}
