//! Application state

use std::sync::Arc;

use crate::{
    auth::{
        build_session_store, AuthService, AuthState, IdentityError, IdentityStore, JwtError,
        JwtManager, MemoryIdentityStore, PgIdentityStore, SessionError, SessionStore,
    },
    config::Config,
};

/// Failures that stop the server from starting
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to load signing keys: {0}")]
    Keys(#[from] JwtError),
    #[error("Failed to initialize session store: {0}")]
    Sessions(#[from] SessionError),
    #[error("Failed to initialize identity store: {0}")]
    Identities(#[from] IdentityError),
}

/// Shared application state
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub auth_service: AuthService,
}

impl AppState {
    /// Parse the keys and connect the configured stores
    pub async fn new(config: Config) -> Result<Self, StartupError> {
        let jwt_manager = JwtManager::from_pem(
            &config.access_private_key,
            &config.access_public_key,
            config.access_token_ttl,
            &config.refresh_private_key,
            &config.refresh_public_key,
            config.refresh_token_ttl,
        )
        .inspect_err(|e| tracing::error!(error = %e, "Signing keys rejected"))?;
        tracing::info!(
            access_ttl_secs = jwt_manager.access_token_expiry_seconds(),
            refresh_ttl_secs = jwt_manager.refresh_token_expiry_seconds(),
            "Token keys loaded"
        );

        let sessions = build_session_store(&config.session_store_settings()).await?;

        let identities: Arc<dyn IdentityStore> = match &config.database_url {
            Some(url) => Arc::new(PgIdentityStore::connect(url, config.request_timeout).await?),
            None => {
                tracing::warn!("DATABASE_URL not set, identities are kept in memory");
                Arc::new(MemoryIdentityStore::new())
            }
        };

        Ok(Self::from_parts(config, jwt_manager, identities, sessions))
    }

    /// Assemble state from already constructed collaborators
    pub fn from_parts(
        config: Config,
        jwt_manager: JwtManager,
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let auth_service = AuthService::new(
            identities,
            sessions,
            jwt_manager.clone(),
            config.request_timeout,
        );

        Self {
            config,
            jwt_manager,
            auth_service,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }
}
