use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;

/// A stored user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned identifier, never reassigned
    pub id: String,
    /// Unique, case-sensitive login
    pub login: String,
    /// Argon2id PHC string (never the plaintext)
    pub password_hash: String,
    pub permissions: Permissions,
}

/// A user about to be inserted; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub password_hash: String,
    pub permissions: Permissions,
}

/// Field update for an existing user. `None` keeps the stored value;
/// permissions are never touched by this path.
#[derive(Debug, Clone, Default)]
pub struct UserChange {
    pub id: String,
    pub login: Option<String>,
    pub password_hash: Option<String>,
}

impl UserChange {
    /// Apply the change to a stored record, preserving id and permissions.
    pub fn apply(&self, user: &User) -> User {
        User {
            id: user.id.clone(),
            login: self.login.clone().unwrap_or_else(|| user.login.clone()),
            password_hash: self
                .password_hash
                .clone()
                .unwrap_or_else(|| user.password_hash.clone()),
            permissions: user.permissions,
        }
    }
}

/// An access/refresh token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Session handle (64 random bytes, hex)
    pub access: String,
    /// Rotation secret (64 random bytes, hex)
    pub refresh: String,
    /// When the access token stops resolving
    pub expiration: DateTime<Utc>,
}

impl Token {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiration
    }
}

/// A token together with the user it is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub owner: String,
    pub token: Token,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_expiry_boundary() {
        let now = Utc::now();
        let token = Token {
            access: "a".into(),
            refresh: "r".into(),
            expiration: now,
        };
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + Duration::milliseconds(1)));
    }

    #[test]
    fn test_user_change_preserves_permissions() {
        let user = User {
            id: "1".into(),
            login: "alice".into(),
            password_hash: "h1".into(),
            permissions: Permissions::LOAN_BOOKS,
        };
        let change = UserChange {
            id: "1".into(),
            login: Some("alicia".into()),
            password_hash: None,
        };

        let changed = change.apply(&user);
        assert_eq!(changed.login, "alicia");
        assert_eq!(changed.password_hash, "h1");
        assert_eq!(changed.permissions, Permissions::LOAN_BOOKS);
        assert_eq!(changed.id, "1");
    }
}
