//! Login, refresh, logout and registration
//!
//! [`AuthService`] owns the session lifecycle. The access token is recorded in
//! the session store under the identity's email at login and on every refresh;
//! refresh only succeeds while that slot is occupied, so deleting it at logout
//! revokes any outstanding refresh token. Refresh writes with
//! [`SessionStore::replace`], which never recreates a slot a logout removed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use super::identity::{normalize_email, Identity, IdentityStore, NewIdentity};
use super::jwt::{JwtManager, Subject, TokenDetails, TokenPayload};
use super::password;
use super::sessions::SessionStore;
use crate::error::{ApiError, ApiResult};

/// Both tokens handed out by a successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginTokens {
    pub access: TokenDetails,
    pub refresh: TokenDetails,
}

#[derive(Clone)]
pub struct AuthService {
    identities: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionStore>,
    jwt: JwtManager,
    timeout: Duration,
    /// Verified against on unknown emails so they cost as much as a wrong password
    decoy_hash: Arc<OnceCell<String>>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("session_backend", &self.sessions.backend())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        jwt: JwtManager,
        timeout: Duration,
    ) -> Self {
        Self {
            identities,
            sessions,
            jwt,
            timeout,
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn jwt_manager(&self) -> &JwtManager {
        &self.jwt
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Run a collaborator call under the request deadline
    async fn bounded<T, E>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> ApiResult<T>
    where
        ApiError: From<E>,
    {
        match timeout(self.timeout, call).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Deadline exceeded");
                Err(ApiError::internal(operation, "deadline exceeded"))
            }
        }
    }

    /// Authenticate `email`/`password` and open a session
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<LoginTokens> {
        if email.trim().is_empty() {
            return Err(ApiError::Validation("Email is required".to_string()));
        }
        if password.is_empty() {
            return Err(ApiError::Validation("Password is required".to_string()));
        }

        let identity = match self
            .bounded("identity lookup", self.identities.find_by_email(email))
            .await
        {
            Ok(identity) => identity,
            Err(ApiError::IdentityNotFound) => {
                tracing::info!("Login attempt for unknown email");
                check_password(password, self.decoy_hash().await?).await?;
                return Err(ApiError::IdentityNotFound);
            }
            Err(e) => return Err(e),
        };

        if !check_password(password, &identity.password_hash).await? {
            tracing::info!(user_id = %identity.id, "Login rejected: wrong password");
            return Err(ApiError::InvalidCredentials);
        }

        let subject = Subject {
            user_id: identity.id,
            email: identity.email,
        };
        let (access, refresh) = self.jwt.generate_token_pair(&subject).map_err(|e| {
            tracing::error!(user_id = %subject.user_id, error = ?e, "Failed to issue tokens");
            ApiError::from(e)
        })?;

        self.bounded("session store", self.sessions.set(&access)).await?;

        tracing::info!(
            user_id = %subject.user_id,
            token_id = %access.token_id,
            "Login successful"
        );
        Ok(LoginTokens { access, refresh })
    }

    /// Trade a refresh token for a new access token
    ///
    /// A cryptographically valid refresh token is still refused once its
    /// identity's session slot is gone.
    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<TokenDetails> {
        let payload = self.jwt.validate_refresh_token(refresh_token).map_err(|e| {
            tracing::debug!(error = ?e, "Refresh token rejected");
            ApiError::from(e)
        })?;

        let access = self.jwt.generate_access_token(&Subject {
            user_id: payload.user_id,
            email: payload.email,
        })?;
        self.bounded("session replace", self.sessions.replace(&access))
            .await
            .inspect_err(|e| {
                if matches!(e, ApiError::SessionExpired) {
                    tracing::info!(user_id = %payload.user_id, "Refresh refused: no active session");
                }
            })?;

        tracing::debug!(
            user_id = %access.payload.user_id,
            token_id = %access.token_id,
            "Access token refreshed"
        );
        Ok(access)
    }

    /// Close the session for `identity_key`; closing twice is fine
    pub async fn logout(&self, identity_key: &str) -> ApiResult<()> {
        self.bounded("session delete", self.sessions.delete(identity_key))
            .await?;
        tracing::info!("Session closed");
        Ok(())
    }

    /// Create an identity with an argon2-hashed password
    pub async fn register(&self, email: &str, password: &str) -> ApiResult<Identity> {
        let email = normalize_email(email);
        validate_email(&email)?;
        password::validate_password_strength(password).map_err(ApiError::Validation)?;

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
            .await
            .map_err(|e| ApiError::internal("password hashing", e))??;

        let identity = self
            .bounded(
                "identity create",
                self.identities.create(NewIdentity {
                    email,
                    password_hash,
                }),
            )
            .await?;

        tracing::info!(user_id = %identity.id, "Identity registered");
        Ok(identity)
    }

    async fn decoy_hash(&self) -> ApiResult<&str> {
        self.decoy_hash
            .get_or_try_init(|| async {
                match tokio::task::spawn_blocking(password::generate_impossible_hash).await {
                    Ok(hash) => hash.map_err(ApiError::from),
                    Err(e) => Err(ApiError::internal("password hashing", e)),
                }
            })
            .await
            .map(String::as_str)
    }

    /// Validate an access token and confirm its session is still open
    pub async fn verify_session(&self, access_token: &str) -> ApiResult<TokenPayload> {
        let payload = self.jwt.validate_access_token(access_token)?;
        self.bounded("session lookup", self.sessions.get(&payload.email))
            .await?;
        Ok(payload)
    }
}

/// Argon2 verification off the async workers
async fn check_password(plain: &str, stored_hash: &str) -> ApiResult<bool> {
    let plain = plain.to_string();
    let stored_hash = stored_hash.to_string();
    let matches = tokio::task::spawn_blocking(move || password::verify_password(&plain, &stored_hash))
        .await
        .map_err(|e| ApiError::internal("password check", e))?;

    matches.map_err(|e| {
        tracing::error!(error = ?e, "Stored password hash is unreadable");
        ApiError::from(e)
    })
}

fn validate_email(email: &str) -> ApiResult<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation("Invalid email address".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::MemoryIdentityStore;
    use crate::auth::jwt::test_keys::jwt_manager;
    use crate::auth::jwt::JwtError;
    use crate::auth::sessions::{MemorySessionStore, SessionError};

    async fn service() -> (AuthService, Arc<MemorySessionStore>) {
        let sessions = Arc::new(MemorySessionStore::new());
        let service = AuthService::new(
            Arc::new(MemoryIdentityStore::new()),
            sessions.clone(),
            jwt_manager(),
            Duration::from_secs(5),
        );
        service
            .register("alice@example.com", "CorrectPass1")
            .await
            .unwrap();
        (service, sessions)
    }

    #[tokio::test]
    async fn test_login_issues_both_tokens_and_records_session() {
        let (service, sessions) = service().await;

        let tokens = service.login("alice@example.com", "CorrectPass1").await.unwrap();
        assert!(!tokens.access.token.is_empty());
        assert!(!tokens.refresh.token.is_empty());
        assert_ne!(tokens.access.token_id, tokens.refresh.token_id);

        let stored = sessions.get("alice@example.com").await.unwrap();
        assert_eq!(stored, tokens.access);
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (service, sessions) = service().await;
        assert!(matches!(
            service.login("alice@example.com", "WrongPass1").await,
            Err(ApiError::InvalidCredentials)
        ));
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_login_unknown_email() {
        let (service, _) = service().await;
        assert!(matches!(
            service.login("bob@example.com", "CorrectPass1").await,
            Err(ApiError::IdentityNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unknown_email_still_runs_password_check() {
        let (service, _) = service().await;
        assert!(service.decoy_hash.get().is_none());

        let _ = service.login("bob@example.com", "CorrectPass1").await;
        let decoy = service.decoy_hash.get().cloned().unwrap();
        assert!(decoy.starts_with("$argon2id$"));

        // built once and reused
        let _ = service.login("carol@example.com", "CorrectPass1").await;
        assert_eq!(service.decoy_hash.get(), Some(&decoy));
    }

    #[tokio::test]
    async fn test_login_empty_input() {
        let (service, _) = service().await;
        assert!(matches!(
            service.login("", "CorrectPass1").await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            service.login("alice@example.com", "").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_overwrites_session() {
        let (service, sessions) = service().await;
        let tokens = service.login("alice@example.com", "CorrectPass1").await.unwrap();

        let access = service.refresh(&tokens.refresh.token).await.unwrap();
        assert_ne!(access.token_id, tokens.access.token_id);
        assert_eq!(access.payload.email, "alice@example.com");
        assert_eq!(sessions.get("alice@example.com").await.unwrap(), access);
    }

    #[tokio::test]
    async fn test_refresh_after_logout_is_session_expired() {
        let (service, _) = service().await;
        let tokens = service.login("alice@example.com", "CorrectPass1").await.unwrap();

        service.logout("alice@example.com").await.unwrap();

        // the refresh token itself still validates
        assert!(service
            .jwt_manager()
            .validate_refresh_token(&tokens.refresh.token)
            .is_ok());
        assert!(matches!(
            service.refresh(&tokens.refresh.token).await,
            Err(ApiError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_refresh_after_logout_does_not_reopen_slot() {
        let (service, sessions) = service().await;
        let tokens = service.login("alice@example.com", "CorrectPass1").await.unwrap();
        service.logout("alice@example.com").await.unwrap();

        assert!(service.refresh(&tokens.refresh.token).await.is_err());
        assert!(sessions.is_empty().await);
        assert!(matches!(
            service.refresh(&tokens.refresh.token).await,
            Err(ApiError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let (service, _) = service().await;
        let tokens = service.login("alice@example.com", "CorrectPass1").await.unwrap();

        let err = service.refresh(&tokens.access.token).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_logout_twice_is_ok() {
        let (service, sessions) = service().await;
        service.login("alice@example.com", "CorrectPass1").await.unwrap();

        service.logout("alice@example.com").await.unwrap();
        service.logout("alice@example.com").await.unwrap();
        assert!(matches!(
            sessions.get("alice@example.com").await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_register_duplicate_and_weak_password() {
        let (service, _) = service().await;
        assert!(matches!(
            service.register("Alice@example.com", "AnotherPass1").await,
            Err(ApiError::AlreadyExists)
        ));
        assert!(matches!(
            service.register("bob@example.com", "short").await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            service.register("not-an-email", "CorrectPass1").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_session() {
        let (service, _) = service().await;
        let tokens = service.login("alice@example.com", "CorrectPass1").await.unwrap();

        let payload = service.verify_session(&tokens.access.token).await.unwrap();
        assert_eq!(payload, tokens.access.payload);

        service.logout("alice@example.com").await.unwrap();
        assert!(matches!(
            service.verify_session(&tokens.access.token).await,
            Err(ApiError::SessionExpired)
        ));
        assert!(matches!(
            service.verify_session("garbage").await,
            Err(ApiError::InvalidToken(JwtError::MalformedClaims))
        ));
    }

    /// Session store that never answers
    struct StalledSessions;

    #[async_trait::async_trait]
    impl SessionStore for StalledSessions {
        async fn get(&self, _key: &str) -> crate::auth::sessions::SessionResult<TokenDetails> {
            std::future::pending().await
        }
        async fn set(&self, _details: &TokenDetails) -> crate::auth::sessions::SessionResult<()> {
            std::future::pending().await
        }
        async fn replace(&self, _details: &TokenDetails) -> crate::auth::sessions::SessionResult<()> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> crate::auth::sessions::SessionResult<()> {
            std::future::pending().await
        }
        fn backend(&self) -> crate::auth::sessions::SessionBackend {
            crate::auth::sessions::SessionBackend::Memory
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_hits_deadline() {
        let service = AuthService::new(
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(StalledSessions),
            jwt_manager(),
            Duration::from_millis(50),
        );
        assert!(matches!(
            service.logout("alice@example.com").await,
            Err(ApiError::Internal(_))
        ));
    }
}
