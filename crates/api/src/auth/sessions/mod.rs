//! Session tracking for token revocation
//!
//! One active session slot per identity, keyed by the identity's email. A new
//! login or refresh overwrites the slot; logout deletes it. Deleting the slot is
//! how a still-valid refresh token gets revoked server side.
//!
//! Two interchangeable backends sit behind [`SessionStore`]:
//! - [`MemorySessionStore`]: process local, mutex guarded, swept on an interval
//! - [`RedisSessionStore`]: remote, expiry enforced by Redis `EX`

mod memory_store;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::jwt::TokenDetails;

pub use memory_store::MemorySessionStore;
pub use redis_store::{RedisSessionStore, RedisSettings};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,
    #[error("Session already expired")]
    Expired,
    #[error("Session store timed out during {0}")]
    Timeout(&'static str),
    #[error("Session store error: {0}")]
    Backend(String),
    #[error("Session encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Which backend holds the sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    Redis,
}

impl std::fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionBackend::Memory => write!(f, "memory"),
            SessionBackend::Redis => write!(f, "redis"),
        }
    }
}

impl std::str::FromStr for SessionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "memo" => Ok(SessionBackend::Memory),
            "redis" => Ok(SessionBackend::Redis),
            other => Err(format!("unknown session backend: {}", other)),
        }
    }
}

/// Key/value store of the most recently issued token per identity
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current session for `key`, or [`SessionError::NotFound`]
    async fn get(&self, key: &str) -> SessionResult<TokenDetails>;

    /// Record `details` under `details.payload.email`, replacing any previous session
    async fn set(&self, details: &TokenDetails) -> SessionResult<()>;

    /// Overwrite an existing session only
    ///
    /// Fails with [`SessionError::NotFound`] and writes nothing when the slot is
    /// empty, so a refresh racing a logout cannot reopen the session.
    async fn replace(&self, details: &TokenDetails) -> SessionResult<()>;

    /// Drop the session for `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> SessionResult<()>;

    fn backend(&self) -> SessionBackend;
}

/// The slot key a session is stored under
pub fn session_key(details: &TokenDetails) -> &str {
    &details.payload.email
}

/// Lifetime to record for `details`, rejecting already expired tokens
pub(crate) fn record_lifetime(details: &TokenDetails) -> SessionResult<Duration> {
    details.remaining_lifetime_now().ok_or(SessionError::Expired)
}

/// Construction-time settings for [`build_session_store`]
#[derive(Debug, Clone)]
pub struct SessionStoreSettings {
    pub backend: SessionBackend,
    pub sweep_interval: Duration,
    pub redis: Option<RedisSettings>,
}

/// Build the configured backend
///
/// The memory backend gets its sweeper task spawned here, so this must run
/// inside a tokio runtime.
pub async fn build_session_store(
    settings: &SessionStoreSettings,
) -> SessionResult<Arc<dyn SessionStore>> {
    match settings.backend {
        SessionBackend::Memory => {
            let store = Arc::new(MemorySessionStore::new());
            store.clone().spawn_sweeper(settings.sweep_interval);
            tracing::info!(
                sweep_interval_secs = settings.sweep_interval.as_secs(),
                "In-memory session store initialized"
            );
            Ok(store)
        }
        SessionBackend::Redis => {
            let redis = settings.redis.as_ref().ok_or_else(|| {
                SessionError::Backend("redis backend selected without redis settings".to_string())
            })?;
            let store = RedisSessionStore::connect(redis).await?;
            tracing::info!(key_prefix = %redis.key_prefix, "Redis session store initialized");
            Ok(Arc::new(store))
        }
    }
}
