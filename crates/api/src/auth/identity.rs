//! Identity lookup
//!
//! The auth flow only needs two things from user storage: find an identity by
//! email, and create one at registration. Emails are compared case-insensitively
//! and stored lowercased.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Postgres SQLSTATE for `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";

/// A registered user as the auth flow sees it
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
}

/// Input to [`IdentityStore::create`]; the password is already hashed
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity not found")]
    NotFound,
    #[error("Identity already exists")]
    AlreadyExists,
    #[error("Identity store error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for IdentityError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => IdentityError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                IdentityError::AlreadyExists
            }
            _ => IdentityError::Database(e.to_string()),
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> IdentityResult<Identity>;

    async fn create(&self, identity: NewIdentity) -> IdentityResult<Identity>;
}

/// Lowercase and trim an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identities held in process memory, for development and tests
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identities: RwLock<HashMap<String, Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_email(&self, email: &str) -> IdentityResult<Identity> {
        self.identities
            .read()
            .await
            .get(&normalize_email(email))
            .cloned()
            .ok_or(IdentityError::NotFound)
    }

    async fn create(&self, identity: NewIdentity) -> IdentityResult<Identity> {
        let email = normalize_email(&identity.email);
        let mut identities = self.identities.write().await;
        if identities.contains_key(&email) {
            return Err(IdentityError::AlreadyExists);
        }

        let created = Identity {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash: identity.password_hash,
        };
        identities.insert(email, created.clone());
        Ok(created)
    }
}

/// Identities in the Postgres `users` table
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool and make sure the `users` table exists
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> IdentityResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        tracing::info!("Postgres identity store initialized");
        Ok(store)
    }

    async fn ensure_schema(&self) -> IdentityResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_email(&self, email: &str) -> IdentityResult<Identity> {
        let identity: Option<Identity> =
            sqlx::query_as("SELECT id, email, password_hash FROM users WHERE email = $1")
                .bind(normalize_email(email))
                .fetch_optional(&self.pool)
                .await?;

        identity.ok_or(IdentityError::NotFound)
    }

    async fn create(&self, identity: NewIdentity) -> IdentityResult<Identity> {
        let created: Identity = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(normalize_email(&identity.email))
        .bind(&identity.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }
}
