//! Configuration loaded from environment variables

use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::auth::sessions::{RedisSettings, SessionBackend, SessionStoreSettings};

/// Longest accepted token lifetime (one year)
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Server configuration
#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub allowed_origins: Vec<String>,

    pub session_backend: SessionBackend,
    pub redis_url: Option<String>,
    pub redis_read_timeout: Duration,
    pub redis_write_timeout: Duration,
    pub session_key_prefix: String,
    pub session_sweep_interval: Duration,

    /// Deadline for every identity lookup and session store call
    pub request_timeout: Duration,

    /// PEM bytes, already base64-decoded
    pub access_private_key: Vec<u8>,
    pub access_public_key: Vec<u8>,
    pub access_token_ttl: Duration,
    pub refresh_private_key: Vec<u8>,
    pub refresh_public_key: Vec<u8>,
    pub refresh_token_ttl: Duration,

    /// Postgres identity store; the in-memory store is used when unset
    pub database_url: Option<String>,

    /// Report unknown emails as invalid credentials
    pub unify_login_errors: bool,
    pub cookie_secure: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("allowed_origins", &self.allowed_origins)
            .field("session_backend", &self.session_backend)
            .field("session_key_prefix", &self.session_key_prefix)
            .field("request_timeout", &self.request_timeout)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("database_configured", &self.database_url.is_some())
            .field("unify_login_errors", &self.unify_login_errors)
            .field("cookie_secure", &self.cookie_secure)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0:8080"),
            allowed_origins: env_or(
                "ALLOWED_ORIGINS",
                "http://localhost:3000,http://127.0.0.1:3000",
            )
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),

            session_backend: env_or("SESSION_BACKEND", "memory")
                .parse()
                .map_err(|reason| ConfigError::Invalid {
                    name: "SESSION_BACKEND",
                    reason,
                })?,
            redis_url: env_opt("REDIS_URL"),
            redis_read_timeout: Duration::from_millis(env_parse("REDIS_READ_TIMEOUT_MS", 5000)?),
            redis_write_timeout: Duration::from_millis(env_parse("REDIS_WRITE_TIMEOUT_MS", 5000)?),
            session_key_prefix: env_or("SESSION_KEY_PREFIX", "session:"),
            session_sweep_interval: Duration::from_secs(env_parse(
                "SESSION_SWEEP_INTERVAL_SECS",
                60,
            )?),

            request_timeout: Duration::from_millis(env_parse("REQUEST_TIMEOUT_MS", 5000)?),

            access_private_key: env_key("ACCESS_PRIVATE_KEY")?,
            access_public_key: env_key("ACCESS_PUBLIC_KEY")?,
            access_token_ttl: Duration::from_secs(env_parse("ACCESS_TOKEN_TTL_SECS", 15 * 60)?),
            refresh_private_key: env_key("REFRESH_PRIVATE_KEY")?,
            refresh_public_key: env_key("REFRESH_PUBLIC_KEY")?,
            refresh_token_ttl: Duration::from_secs(env_parse(
                "REFRESH_TOKEN_TTL_SECS",
                30 * 24 * 60 * 60,
            )?),

            database_url: env_opt("DATABASE_URL"),

            unify_login_errors: env_parse("UNIFY_LOGIN_ERRORS", false)?,
            cookie_secure: env_parse("COOKIE_SECURE", true)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would fail at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_ttl.is_zero() {
            return Err(invalid("ACCESS_TOKEN_TTL_SECS", "must be greater than zero"));
        }
        if self.refresh_token_ttl.is_zero() {
            return Err(invalid("REFRESH_TOKEN_TTL_SECS", "must be greater than zero"));
        }
        if self.access_token_ttl > MAX_TOKEN_TTL {
            return Err(invalid("ACCESS_TOKEN_TTL_SECS", "must not exceed one year"));
        }
        if self.refresh_token_ttl > MAX_TOKEN_TTL {
            return Err(invalid("REFRESH_TOKEN_TTL_SECS", "must not exceed one year"));
        }
        if self.refresh_token_ttl < self.access_token_ttl {
            return Err(invalid(
                "REFRESH_TOKEN_TTL_SECS",
                "must not be shorter than ACCESS_TOKEN_TTL_SECS",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("REQUEST_TIMEOUT_MS", "must be greater than zero"));
        }
        if self.session_sweep_interval.is_zero() {
            return Err(invalid("SESSION_SWEEP_INTERVAL_SECS", "must be greater than zero"));
        }
        if self.session_backend == SessionBackend::Redis && self.redis_url.is_none() {
            return Err(ConfigError::Missing("REDIS_URL"));
        }
        Ok(())
    }

    pub fn session_store_settings(&self) -> SessionStoreSettings {
        SessionStoreSettings {
            backend: self.session_backend,
            sweep_interval: self.session_sweep_interval,
            redis: self.redis_url.as_ref().map(|url| RedisSettings {
                url: url.clone(),
                key_prefix: self.session_key_prefix.clone(),
                read_timeout: self.redis_read_timeout,
                write_timeout: self.redis_write_timeout,
            }),
        }
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Key material is base64-encoded PEM; a raw PEM block is accepted as well
fn env_key(name: &'static str) -> Result<Vec<u8>, ConfigError> {
    let raw = env_opt(name).ok_or(ConfigError::Missing(name))?;
    decode_key(&raw).map_err(|reason| ConfigError::Invalid { name, reason })
}

fn decode_key(raw: &str) -> Result<Vec<u8>, String> {
    let raw = raw.trim();
    if raw.starts_with("-----BEGIN") {
        return Ok(raw.as_bytes().to_vec());
    }
    let compact: String = raw.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .map_err(|e| format!("not valid base64: {}", e))
}
