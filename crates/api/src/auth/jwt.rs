//! RS256 token issuance and validation
//!
//! Access and refresh tokens are signed by two independent RSA key pairs so a
//! leaked access key cannot be used to mint refresh tokens. Keys are parsed once,
//! when [`TokenKeys`] is built, and shared by every request afterwards.

use std::collections::HashSet;
use std::time::Duration;

use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The only signing algorithm this service accepts
const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Invalid key format: {0}")]
    KeyFormat(String),
    #[error("Failed to sign token: {0}")]
    Signing(String),
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Token expired")]
    Expired,
    #[error("Malformed token claims")]
    MalformedClaims,
    #[error("Wrong token type")]
    WrongTokenType,
}

impl JwtError {
    /// Expired tokens can be renewed; everything else needs a fresh login
    pub fn is_expired(&self) -> bool {
        matches!(self, JwtError::Expired)
    }
}

pub type JwtResult<T> = Result<T, JwtError>;

/// Token family marker, embedded as the `typ` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

/// The principal a token is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub user_id: Uuid,
    pub email: String,
}

/// Decoded identity carried by a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Unique per issuance, also sent as `jti`
    pub token_id: Uuid,
    pub user_id: Uuid,
    /// Session slot key for this identity
    pub email: String,
}

/// Everything known about a freshly issued token
///
/// Immutable once created. A refresh produces a new value rather than editing
/// the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDetails {
    pub token_id: Uuid,
    pub token: String,
    pub payload: TokenPayload,
    pub time_to_live: Duration,
    /// UTC epoch second at which the token stops validating
    pub expires_at: i64,
}

impl TokenDetails {
    /// Lifetime left at `now`, or `None` once the token has expired
    pub fn remaining_lifetime(&self, now: OffsetDateTime) -> Option<Duration> {
        let remaining = self.expires_at.saturating_sub(now.unix_timestamp());
        if remaining <= 0 {
            return None;
        }
        Some(Duration::from_secs(remaining as u64).min(self.time_to_live))
    }

    /// Lifetime left right now
    pub fn remaining_lifetime_now(&self) -> Option<Duration> {
        self.remaining_lifetime(OffsetDateTime::now_utc())
    }
}

/// JWT claims as they appear on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub token_id: Uuid,
    pub jti: Uuid,
    pub typ: TokenType,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Only the expiry, read without verifying the signature
#[derive(Debug, Deserialize)]
struct ExpiryProbe {
    exp: i64,
}

/// Parsed key pair and TTL for one token family
#[derive(Clone)]
pub struct TokenKeys {
    token_type: TokenType,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    validation: Validation,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("token_type", &self.token_type)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenKeys {
    /// Parse a PEM key pair (PKCS#1 or PKCS#8 / SPKI)
    pub fn from_pem(
        token_type: TokenType,
        private_pem: &[u8],
        public_pem: &[u8],
        ttl: Duration,
    ) -> JwtResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| JwtError::KeyFormat(format!("{} private key: {}", token_type, e)))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| JwtError::KeyFormat(format!("{} public key: {}", token_type, e)))?;

        // exp/nbf are checked by hand against the caller's clock with zero leeway
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        Ok(Self {
            token_type,
            encoding_key,
            decoding_key,
            ttl,
            validation,
        })
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `subject` valid from now until now + ttl
    pub fn issue(&self, subject: &Subject) -> JwtResult<TokenDetails> {
        self.issue_at(subject, OffsetDateTime::now_utc())
    }

    /// Issue a token as if the current time were `now`
    pub fn issue_at(&self, subject: &Subject, now: OffsetDateTime) -> JwtResult<TokenDetails> {
        let token_id = Uuid::new_v4();
        let iat = now.unix_timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or_else(|| {
                JwtError::Signing(format!("ttl of {}s overflows the expiry", self.ttl.as_secs()))
            })?;

        let claims = Claims {
            sub: subject.user_id,
            email: subject.email.clone(),
            token_id,
            jti: token_id,
            typ: self.token_type,
            iat,
            nbf: iat,
            exp,
        };

        let token = encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!(token_type = %self.token_type, error = ?e, "Token signing failed");
                JwtError::Signing(e.to_string())
            })?;

        Ok(TokenDetails {
            token_id,
            token,
            payload: TokenPayload {
                token_id,
                user_id: subject.user_id,
                email: subject.email.clone(),
            },
            time_to_live: self.ttl,
            expires_at: exp,
        })
    }

    /// Verify `token` against this family's public key and the current time
    pub fn validate(&self, token: &str) -> JwtResult<TokenPayload> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }

    /// Verify `token` as if the current time were `now`
    pub fn validate_at(&self, token: &str, now: OffsetDateTime) -> JwtResult<TokenPayload> {
        let now = now.unix_timestamp();

        let header = decode_header(token).map_err(|_| JwtError::MalformedClaims)?;
        if header.alg != SIGNING_ALGORITHM {
            tracing::warn!(alg = ?header.alg, "Rejected token with unexpected algorithm");
            return Err(JwtError::InvalidSignature);
        }

        let data = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data,
            Err(e) => {
                return Err(match e.kind() {
                    ErrorKind::InvalidSignature => {
                        // Expiry wins over a bad signature; both are rejected
                        if expired_unverified(token, now) {
                            JwtError::Expired
                        } else {
                            JwtError::InvalidSignature
                        }
                    }
                    ErrorKind::InvalidAlgorithm
                    | ErrorKind::InvalidAlgorithmName
                    | ErrorKind::InvalidRsaKey(_)
                    | ErrorKind::InvalidKeyFormat => JwtError::InvalidSignature,
                    _ => JwtError::MalformedClaims,
                });
            }
        };

        let claims = data.claims;
        if now >= claims.exp {
            return Err(JwtError::Expired);
        }
        if now < claims.nbf || claims.iat > claims.exp || claims.jti != claims.token_id {
            return Err(JwtError::MalformedClaims);
        }
        if claims.typ != self.token_type {
            return Err(JwtError::WrongTokenType);
        }

        Ok(TokenPayload {
            token_id: claims.token_id,
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

/// Read `exp` without trusting anything else in the token
fn expired_unverified(token: &str, now: i64) -> bool {
    let mut validation = Validation::new(SIGNING_ALGORITHM);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<ExpiryProbe>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| now >= data.claims.exp)
        .unwrap_or(false)
}

/// Issues and validates both token families
#[derive(Clone, Debug)]
pub struct JwtManager {
    access: TokenKeys,
    refresh: TokenKeys,
}

impl JwtManager {
    pub fn new(access: TokenKeys, refresh: TokenKeys) -> Self {
        Self { access, refresh }
    }

    /// Build both families from PEM bytes
    pub fn from_pem(
        access_private: &[u8],
        access_public: &[u8],
        access_ttl: Duration,
        refresh_private: &[u8],
        refresh_public: &[u8],
        refresh_ttl: Duration,
    ) -> JwtResult<Self> {
        Ok(Self {
            access: TokenKeys::from_pem(TokenType::Access, access_private, access_public, access_ttl)?,
            refresh: TokenKeys::from_pem(
                TokenType::Refresh,
                refresh_private,
                refresh_public,
                refresh_ttl,
            )?,
        })
    }

    pub fn access_keys(&self) -> &TokenKeys {
        &self.access
    }

    pub fn refresh_keys(&self) -> &TokenKeys {
        &self.refresh
    }

    pub fn generate_access_token(&self, subject: &Subject) -> JwtResult<TokenDetails> {
        self.access.issue(subject)
    }

    pub fn generate_refresh_token(&self, subject: &Subject) -> JwtResult<TokenDetails> {
        self.refresh.issue(subject)
    }

    /// Access and refresh tokens for one login, each with its own token id
    pub fn generate_token_pair(&self, subject: &Subject) -> JwtResult<(TokenDetails, TokenDetails)> {
        Ok((self.access.issue(subject)?, self.refresh.issue(subject)?))
    }

    pub fn validate_access_token(&self, token: &str) -> JwtResult<TokenPayload> {
        self.access.validate(token)
    }

    pub fn validate_refresh_token(&self, token: &str) -> JwtResult<TokenPayload> {
        self.refresh.validate(token)
    }

    pub fn access_token_expiry_seconds(&self) -> u64 {
        self.access.ttl().as_secs()
    }

    pub fn refresh_token_expiry_seconds(&self) -> u64 {
        self.refresh.ttl().as_secs()
    }
}
