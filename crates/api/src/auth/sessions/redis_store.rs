//! Redis-backed session store
//!
//! Records are written with `SET key value EX <remaining>` so Redis evicts them
//! when the token that created them expires. Every round trip is bounded by the
//! configured read or write timeout; dropping the calling future cancels it.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::{record_lifetime, session_key, SessionBackend, SessionError, SessionResult, SessionStore};
use crate::auth::jwt::TokenDetails;

/// Connection attempts made at startup before giving up
const CONNECT_ATTEMPTS: usize = 5;

/// Connection and timeout settings for the Redis backend
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub key_prefix: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl From<redis::RedisError> for SessionError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            SessionError::Timeout("redis")
        } else {
            SessionError::Backend(e.to_string())
        }
    }
}

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    key_prefix: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("key_prefix", &self.key_prefix)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Connect, retrying with exponential backoff, and verify with `PING`
    pub async fn connect(settings: &RedisSettings) -> SessionResult<Self> {
        let client = redis::Client::open(settings.url.as_str())?;

        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(CONNECT_ATTEMPTS);

        let conn = Retry::spawn(strategy, || {
            let client = client.clone();
            async move {
                let result = ConnectionManager::new(client).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "Redis connection attempt failed");
                }
                result
            }
        })
        .await?;

        let store = Self {
            conn,
            key_prefix: settings.key_prefix.clone(),
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
        };
        store.ping().await?;
        Ok(store)
    }

    async fn ping(&self) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let _: String = timeout(self.read_timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| SessionError::Timeout("ping"))??;
        Ok(())
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, key: &str) -> SessionResult<TokenDetails> {
        let mut conn = self.conn.clone();
        let value: Option<String> = timeout(self.read_timeout, conn.get::<_, Option<String>>(self.namespaced(key)))
            .await
            .map_err(|_| SessionError::Timeout("get"))??;

        let value = value.ok_or(SessionError::NotFound)?;
        Ok(serde_json::from_str(&value)?)
    }

    async fn set(&self, details: &TokenDetails) -> SessionResult<()> {
        let lifetime = record_lifetime(details)?;
        let value = serde_json::to_string(details)?;
        let key = self.namespaced(session_key(details));

        let mut conn = self.conn.clone();
        let _: () = timeout(
            self.write_timeout,
            conn.set_ex::<_, _, ()>(key, value, lifetime.as_secs().max(1)),
        )
        .await
        .map_err(|_| SessionError::Timeout("set"))??;
        Ok(())
    }

    async fn replace(&self, details: &TokenDetails) -> SessionResult<()> {
        let lifetime = record_lifetime(details)?;
        let value = serde_json::to_string(details)?;
        let key = self.namespaced(session_key(details));

        // XX: only written when the key already exists; nil reply otherwise
        let mut conn = self.conn.clone();
        let reply: Option<String> = timeout(
            self.write_timeout,
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(lifetime.as_secs().max(1))
                .arg("XX")
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| SessionError::Timeout("replace"))??;

        reply.map(|_| ()).ok_or(SessionError::NotFound)
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = timeout(self.write_timeout, conn.del::<_, i64>(self.namespaced(key)))
            .await
            .map_err(|_| SessionError::Timeout("delete"))??;
        Ok(())
    }

    fn backend(&self) -> SessionBackend {
        SessionBackend::Redis
    }
}
