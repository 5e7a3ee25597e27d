//! Password hashing and verification (argon2id, PHC strings)

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Minimum accepted password length at sign-up
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Upper bound to keep hashing cost bounded
pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Stored password hash is corrupt")]
    CorruptHash,
    #[error("Failed to hash password: {0}")]
    Hashing(String),
}

/// Hash a plaintext password with a fresh random salt
pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Check `plain` against a stored PHC hash
///
/// A wrong password is `Ok(false)`. Only a hash that cannot be parsed is an error.
/// The digest comparison inside argon2 is constant time.
pub fn verify_password(plain: &str, stored_hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|_| PasswordError::CorruptHash)?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(_) => Err(PasswordError::CorruptHash),
    }
}

/// Hash that no password verifies against
///
/// Verifying against it costs the same as a real check, so an unknown email
/// takes as long as a wrong password.
pub fn generate_impossible_hash() -> Result<String, PasswordError> {
    hash_password(&uuid::Uuid::new_v4().to_string())
}

/// Reject passwords that are too short, too long, or only whitespace
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at most {} characters",
            MAX_PASSWORD_LENGTH
        ));
    }
    if password.trim().is_empty() {
        return Err("Password must not be blank".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("CorrectPass1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("CorrectPass1", &hash).unwrap());
    }

    #[test]
    fn test_wrong_password_is_false_not_error() {
        let hash = hash_password("CorrectPass1").unwrap();
        assert!(!verify_password("WrongPass1", &hash).unwrap());
    }

    #[test]
    fn test_corrupt_hash_is_error() {
        assert!(matches!(
            verify_password("CorrectPass1", "not-a-phc-string"),
            Err(PasswordError::CorruptHash)
        ));
        assert!(matches!(
            verify_password("CorrectPass1", ""),
            Err(PasswordError::CorruptHash)
        ));
    }

    #[test]
    fn test_same_password_different_salts() {
        let a = hash_password("CorrectPass1").unwrap();
        let b = hash_password("CorrectPass1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_impossible_hash_never_matches() {
        let hash = generate_impossible_hash().unwrap();
        assert!(!verify_password("", &hash).unwrap());
        assert!(!verify_password("CorrectPass1", &hash).unwrap());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("CorrectPass1").is_ok());
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("        ").is_err());
        assert!(validate_password_strength(&"x".repeat(MAX_PASSWORD_LENGTH + 1)).is_err());
    }
}
