//! Authentication module for Keystone

pub mod identity;
pub mod jwt;
pub mod middleware;
#[cfg(test)]
mod middleware_tests;
pub mod password;
pub mod service;
pub mod sessions;

pub use identity::{
    Identity, IdentityError, IdentityStore, MemoryIdentityStore, NewIdentity, PgIdentityStore,
};
pub use jwt::{Claims, JwtError, JwtManager, Subject, TokenDetails, TokenKeys, TokenPayload, TokenType};
pub(crate) use middleware::extract_bearer_token;
pub use middleware::{
    extract_authorization_bearer, extract_cookie, optional_auth, require_auth, AuthError,
    AuthState, AuthUser, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE,
};
pub use password::{
    generate_impossible_hash, hash_password, validate_password_strength, verify_password,
};
pub use service::{AuthService, LoginTokens};
pub use sessions::{
    build_session_store, MemorySessionStore, RedisSessionStore, SessionBackend, SessionError,
    SessionStore,
};
