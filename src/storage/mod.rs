//! Persistence for users and tokens.
//!
//! [`Store`] is the contract the session engine depends on. It holds no
//! business rules: uniqueness of logins is enforced here because only the
//! store can make check-and-insert atomic, but expiry policy, permissions and
//! token generation live in the engine.

mod db;
pub mod memory;
pub mod models;
pub mod sqlite;
mod tables;
mod tokens;
mod users;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use db::{Database, DatabaseError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StorageBackend;
use crate::error::AuthError;
use crate::permissions::Permissions;
use models::{NewUser, StoredToken, Token, User, UserChange};

pub trait Store: Send + Sync {
    /// Insert a user if the login is free. Returns the assigned id, or
    /// `DuplicateUser` when the login is taken.
    fn save_user(&self, user: &NewUser) -> Result<String, AuthError>;

    /// Id of the user whose login matches and whose stored hash verifies
    /// `password`; `NoUser` otherwise.
    fn check_user(&self, login: &str, password: &str) -> Result<String, AuthError>;

    fn user(&self, id: &str) -> Result<User, AuthError>;

    /// Remove a user and every token bound to it in one step. Returns how many
    /// tokens went with it; `NoUser` if absent.
    fn pop_user(&self, id: &str) -> Result<usize, AuthError>;

    /// Update login and/or password hash, keeping permissions. `NoUser` for an
    /// unknown id, `DuplicateUser` if the new login belongs to someone else.
    fn change_user(&self, change: &UserChange) -> Result<User, AuthError>;

    /// Replace the permission bitmask; `NoUser` if the id is unknown.
    fn set_permission(&self, id: &str, permissions: Permissions) -> Result<(), AuthError>;

    /// Insert or overwrite a token keyed by its access value. Fails with
    /// `NoUser` if `owner` is not on record when the write happens.
    fn save_token(&self, token: &Token, owner: &str) -> Result<(), AuthError>;

    /// Whether an access value is on record.
    fn check_token(&self, access: &str) -> Result<bool, AuthError>;

    /// Whether a refresh value belongs to any token on record.
    fn refresh_in_use(&self, refresh: &str) -> Result<bool, AuthError>;

    fn load_token(&self, access: &str) -> Result<Option<Token>, AuthError>;

    /// Owner of an access token; `TokenExistence` if absent.
    fn get_session_id(&self, access: &str) -> Result<String, AuthError>;

    /// Compare the stored expiration with `now`; `TokenExistence` if absent.
    fn token_expired(&self, access: &str, now: DateTime<Utc>) -> Result<bool, AuthError>;

    /// Remove a token. Removing an unknown token is not an error.
    fn pop_token(&self, access: &str) -> Result<(), AuthError>;

    /// Atomically swap the token at `access` for `new`, keeping its owner.
    ///
    /// Fails with `TokenExistence` if `access` is gone and `NoRefresh` if
    /// `refresh` does not match, leaving the store unchanged in both cases.
    fn replace_token(&self, access: &str, refresh: &str, new: &Token)
        -> Result<String, AuthError>;

    fn load_users(&self) -> Result<Vec<User>, AuthError>;

    fn load_tokens(&self) -> Result<Vec<StoredToken>, AuthError>;
}

/// Open the configured backend. On-disk backends live under `data_dir`.
pub fn open_store(backend: StorageBackend, data_dir: &Path) -> Result<Arc<dyn Store>, AuthError> {
    let store: Arc<dyn Store> = match backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => {
            std::fs::create_dir_all(data_dir).map_err(DatabaseError::from)?;
            Arc::new(SqliteStore::open(&data_dir.join("user-service.sqlite3"))?)
        }
        StorageBackend::Redb => Arc::new(Database::open(data_dir)?),
    };
    Ok(store)
}
