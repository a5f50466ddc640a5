//! Password hashing.
//!
//! Passwords are stored as Argon2id PHC strings
//! (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`). The string carries its own
//! parameters, so verification works for hashes made under older settings.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::config::PasswordConfig;
use crate::error::AuthError;

const SALT_BYTES: usize = 16;

/// Hashes new passwords with a fixed Argon2id cost.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: Params,
}

impl CredentialHasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    pub fn from_config(config: &PasswordConfig) -> Result<Self, AuthError> {
        Self::new(config.memory_kib, config.iterations, config.parallelism)
    }

    /// Hash a password under a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let mut salt_bytes = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hashing(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let phc = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Ok(phc.to_string())
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

/// Check `password` against a stored PHC string. Malformed hashes never match.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> CredentialHasher {
        CredentialHasher::new(8, 1, 1).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = cheap().hash("pw1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "pw1"));
        assert!(!verify_password(&hash, "pw2"));
    }

    #[test]
    fn test_same_password_different_salt() {
        let hasher = cheap();
        let h1 = hasher.hash("pw1").unwrap();
        let h2 = hasher.hash("pw1").unwrap();
        assert_ne!(h1, h2);
        assert!(verify_password(&h1, "pw1"));
        assert!(verify_password(&h2, "pw1"));
    }

    #[test]
    fn test_plaintext_is_not_a_hash() {
        assert!(!verify_password("pw1", "pw1"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(matches!(
            CredentialHasher::new(0, 0, 0),
            Err(AuthError::Hashing(_))
        ));
    }
}
