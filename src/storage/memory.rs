//! Map-based store for tests and single-process deployments.
//!
//! Users and tokens sit behind two reader/writer locks. An operation that
//! needs both takes the users lock first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::models::{NewUser, StoredToken, Token, User, UserChange};
use super::Store;
use crate::credentials::verify_password;
use crate::error::AuthError;
use crate::permissions::Permissions;

#[derive(Default)]
struct UserTable {
    by_id: HashMap<String, User>,
    /// login -> id
    logins: HashMap<String, String>,
}

#[derive(Default)]
struct TokenTable {
    by_access: HashMap<String, StoredToken>,
    /// refresh -> access
    refreshes: HashMap<String, String>,
}

impl TokenTable {
    fn insert(&mut self, stored: StoredToken) {
        if let Some(previous) = self.by_access.remove(&stored.token.access) {
            self.refreshes.remove(&previous.token.refresh);
        }
        self.refreshes
            .insert(stored.token.refresh.clone(), stored.token.access.clone());
        self.by_access.insert(stored.token.access.clone(), stored);
    }

    fn remove(&mut self, access: &str) -> Option<StoredToken> {
        let stored = self.by_access.remove(access)?;
        self.refreshes.remove(&stored.token.refresh);
        Some(stored)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<UserTable>,
    tokens: RwLock<TokenTable>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn save_user(&self, user: &NewUser) -> Result<String, AuthError> {
        let mut users = self.users.write();
        if users.logins.contains_key(&user.login) {
            return Err(AuthError::DuplicateUser);
        }

        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        users.logins.insert(user.login.clone(), id.clone());
        users.by_id.insert(
            id.clone(),
            User {
                id: id.clone(),
                login: user.login.clone(),
                password_hash: user.password_hash.clone(),
                permissions: user.permissions,
            },
        );
        Ok(id)
    }

    fn check_user(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let (id, hash) = {
            let users = self.users.read();
            let id = users.logins.get(login).ok_or(AuthError::NoUser)?;
            let user = users.by_id.get(id).ok_or(AuthError::NoUser)?;
            (user.id.clone(), user.password_hash.clone())
        };

        // Hash verification runs outside the lock.
        if verify_password(&hash, password) {
            Ok(id)
        } else {
            Err(AuthError::NoUser)
        }
    }

    fn user(&self, id: &str) -> Result<User, AuthError> {
        self.users
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or(AuthError::NoUser)
    }

    fn pop_user(&self, id: &str) -> Result<usize, AuthError> {
        let mut users = self.users.write();
        let user = users.by_id.remove(id).ok_or(AuthError::NoUser)?;
        users.logins.remove(&user.login);

        let mut tokens = self.tokens.write();
        let owned: Vec<String> = tokens
            .by_access
            .values()
            .filter(|stored| stored.owner == id)
            .map(|stored| stored.token.access.clone())
            .collect();
        for access in &owned {
            tokens.remove(access);
        }
        Ok(owned.len())
    }

    fn change_user(&self, change: &UserChange) -> Result<User, AuthError> {
        let mut users = self.users.write();
        let current = users.by_id.get(&change.id).ok_or(AuthError::NoUser)?;
        let updated = change.apply(current);

        if updated.login != current.login {
            if users.logins.contains_key(&updated.login) {
                return Err(AuthError::DuplicateUser);
            }
            let old_login = current.login.clone();
            users.logins.remove(&old_login);
            users
                .logins
                .insert(updated.login.clone(), updated.id.clone());
        }

        users.by_id.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    fn set_permission(&self, id: &str, permissions: Permissions) -> Result<(), AuthError> {
        let mut users = self.users.write();
        let user = users.by_id.get_mut(id).ok_or(AuthError::NoUser)?;
        user.permissions = permissions;
        Ok(())
    }

    fn save_token(&self, token: &Token, owner: &str) -> Result<(), AuthError> {
        // Held until the insert lands so a concurrent pop_user cannot slip between.
        let users = self.users.read();
        if !users.by_id.contains_key(owner) {
            return Err(AuthError::NoUser);
        }

        self.tokens.write().insert(StoredToken {
            owner: owner.to_string(),
            token: token.clone(),
        });
        Ok(())
    }

    fn check_token(&self, access: &str) -> Result<bool, AuthError> {
        Ok(self.tokens.read().by_access.contains_key(access))
    }

    fn refresh_in_use(&self, refresh: &str) -> Result<bool, AuthError> {
        Ok(self.tokens.read().refreshes.contains_key(refresh))
    }

    fn load_token(&self, access: &str) -> Result<Option<Token>, AuthError> {
        Ok(self
            .tokens
            .read()
            .by_access
            .get(access)
            .map(|stored| stored.token.clone()))
    }

    fn get_session_id(&self, access: &str) -> Result<String, AuthError> {
        self.tokens
            .read()
            .by_access
            .get(access)
            .map(|stored| stored.owner.clone())
            .ok_or(AuthError::TokenExistence)
    }

    fn token_expired(&self, access: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        self.tokens
            .read()
            .by_access
            .get(access)
            .map(|stored| stored.token.is_expired_at(now))
            .ok_or(AuthError::TokenExistence)
    }

    fn pop_token(&self, access: &str) -> Result<(), AuthError> {
        self.tokens.write().remove(access);
        Ok(())
    }

    fn replace_token(
        &self,
        access: &str,
        refresh: &str,
        new: &Token,
    ) -> Result<String, AuthError> {
        let mut tokens = self.tokens.write();
        let stored = tokens
            .by_access
            .get(access)
            .ok_or(AuthError::TokenExistence)?;
        if stored.token.refresh != refresh {
            return Err(AuthError::NoRefresh);
        }

        let owner = stored.owner.clone();
        tokens.remove(access);
        tokens.insert(StoredToken {
            owner: owner.clone(),
            token: new.clone(),
        });
        Ok(owner)
    }

    fn load_users(&self) -> Result<Vec<User>, AuthError> {
        Ok(self.users.read().by_id.values().cloned().collect())
    }

    fn load_tokens(&self) -> Result<Vec<StoredToken>, AuthError> {
        Ok(self.tokens.read().by_access.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_token, make_user};

    #[test]
    fn test_ids_are_per_store() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        assert_eq!(a.save_user(&make_user("alice", "pw1")).unwrap(), "1");
        assert_eq!(b.save_user(&make_user("alice", "pw1")).unwrap(), "1");
        assert_eq!(a.save_user(&make_user("bob", "pw2")).unwrap(), "2");
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let store = MemoryStore::new();
        let id = store.save_user(&make_user("alice", "pw1")).unwrap();
        store.pop_user(&id).unwrap();

        let again = store.save_user(&make_user("alice", "pw1")).unwrap();
        assert_ne!(id, again);
    }

    #[test]
    fn test_overwrite_token_drops_old_refresh() {
        let store = MemoryStore::new();
        let id = store.save_user(&make_user("alice", "pw1")).unwrap();
        let first = make_token("a1", "r1", 60);
        store.save_token(&first, &id).unwrap();

        let mut second = first.clone();
        second.refresh = "r2".into();
        store.save_token(&second, &id).unwrap();

        assert!(!store.refresh_in_use("r1").unwrap());
        assert!(store.refresh_in_use("r2").unwrap());
        assert_eq!(store.load_tokens().unwrap().len(), 1);
    }

    #[test]
    fn test_save_token_needs_owner() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.save_token(&make_token("a1", "r1", 60), "1"),
            Err(AuthError::NoUser)
        ));
        assert!(!store.check_token("a1").unwrap());
    }

    #[test]
    fn test_pop_user_takes_tokens() {
        let store = MemoryStore::new();
        let alice = store.save_user(&make_user("alice", "pw1")).unwrap();
        let bob = store.save_user(&make_user("bob", "pw2")).unwrap();
        store.save_token(&make_token("a1", "r1", 60), &alice).unwrap();
        store.save_token(&make_token("a2", "r2", 60), &alice).unwrap();
        store.save_token(&make_token("a3", "r3", 60), &bob).unwrap();

        assert_eq!(store.pop_user(&alice).unwrap(), 2);
        assert!(!store.refresh_in_use("r1").unwrap());
        assert_eq!(store.get_session_id("a3").unwrap(), bob);
        assert!(matches!(
            store.save_token(&make_token("a4", "r4", 60), &alice),
            Err(AuthError::NoUser)
        ));
    }
}
