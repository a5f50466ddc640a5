use thiserror::Error;

use crate::storage::DatabaseError;

/// Sentinel errors shared by the store contract and the session engine.
///
/// The first group are business outcomes a caller is expected to match on.
/// The trailing variants wrap operational failures of a backend and are never
/// produced by business rules.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login duplication")]
    DuplicateUser,
    #[error("no user")]
    NoUser,
    #[error("not unique access token")]
    DupAccess,
    #[error("not unique refresh token")]
    DupRefresh,
    #[error("impossible to generate token")]
    NoTokens,
    #[error("token expired")]
    TokenExpired,
    #[error("token does not exist")]
    TokenExistence,
    #[error("wrong permissions")]
    WrongPermissions,
    #[error("refresh token does not match")]
    NoRefresh,
    #[error("invalid permissions: {0}")]
    InvalidPermissions(String),

    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Password hashing error: {0}")]
    Hashing(String),
}

impl AuthError {
    /// True for failures caused by the backend rather than by the request.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            AuthError::Database(_) | AuthError::Sqlite(_) | AuthError::Hashing(_)
        )
    }
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
