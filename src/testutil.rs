//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use crate::config::Config;
use crate::credentials::CredentialHasher;
use crate::service::AuthService;
use crate::storage::models::{NewUser, Token};
use crate::storage::{Database, MemoryStore};
use crate::AppState;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard. The caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// Argon2 with the smallest legal cost, so tests stay fast.
pub fn cheap_hasher() -> CredentialHasher {
    CredentialHasher::new(8, 1, 1).unwrap()
}

/// A `NewUser` with a real (cheap) hash of `password` and no permissions.
pub fn make_user(login: &str, password: &str) -> NewUser {
    NewUser {
        login: login.to_string(),
        password_hash: cheap_hasher().hash(password).unwrap(),
        permissions: Default::default(),
    }
}

/// A token expiring `ttl_secs` from now (negative for already expired).
pub fn make_token(access: &str, refresh: &str, ttl_secs: i64) -> Token {
    Token {
        access: access.to_string(),
        refresh: refresh.to_string(),
        expiration: Utc::now() + chrono::Duration::seconds(ttl_secs),
    }
}

/// An engine over a fresh in-memory store.
pub fn test_service() -> AuthService {
    AuthService::new(
        Arc::new(MemoryStore::new()),
        cheap_hasher(),
        chrono::Duration::minutes(10),
    )
}

/// A minimal `Config` suitable for unit tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.password.memory_kib = 8;
    config.password.iterations = 1;
    config
}

/// Build a full `Arc<AppState>` over an in-memory store.
pub fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(test_config(), Arc::new(MemoryStore::new())).unwrap())
}
