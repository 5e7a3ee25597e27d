//! Process-local session store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{record_lifetime, session_key, SessionBackend, SessionError, SessionResult, SessionStore};
use crate::auth::jwt::TokenDetails;

#[derive(Debug)]
struct StoredSession {
    /// Serialized `TokenDetails`
    value: String,
    deadline: Instant,
}

impl StoredSession {
    fn new(details: &TokenDetails) -> SessionResult<Self> {
        let lifetime = record_lifetime(details)?;
        let deadline = Instant::now().checked_add(lifetime).ok_or_else(|| {
            SessionError::Backend(format!("session lifetime of {:?} is out of range", lifetime))
        })?;
        Ok(Self {
            value: serde_json::to_string(details)?,
            deadline,
        })
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Mutex-guarded map of sessions
///
/// Records expire on the same schedule as the token that created them: reads
/// past the deadline miss, and [`spawn_sweeper`](Self::spawn_sweeper) evicts them.
/// A process restart drops everything.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict expired records, returning how many were removed
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    /// Number of records currently held, expired or not
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the store is dropped
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let evicted = store.sweep().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Swept expired sessions");
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> SessionResult<TokenDetails> {
        let value = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get(key).ok_or(SessionError::NotFound)?;
            if session.is_expired(Instant::now()) {
                sessions.remove(key);
                return Err(SessionError::NotFound);
            }
            session.value.clone()
        };

        Ok(serde_json::from_str(&value)?)
    }

    async fn set(&self, details: &TokenDetails) -> SessionResult<()> {
        let record = StoredSession::new(details)?;
        self.sessions
            .lock()
            .await
            .insert(session_key(details).to_string(), record);
        Ok(())
    }

    async fn replace(&self, details: &TokenDetails) -> SessionResult<()> {
        let record = StoredSession::new(details)?;
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_key(details)) {
            Some(current) if !current.is_expired(Instant::now()) => {
                *current = record;
                Ok(())
            }
            _ => Err(SessionError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.sessions.lock().await.remove(key);
        Ok(())
    }

    fn backend(&self) -> SessionBackend {
        SessionBackend::Memory
    }
}
