use chrono::{DateTime, Utc};
use redb::{Database as RedbDatabase, ReadTransaction, WriteTransaction};
use std::path::Path;
use thiserror::Error;

use super::models::{NewUser, StoredToken, Token, User, UserChange};
use super::tables::*;
use super::Store;
use crate::credentials::verify_password;
use crate::error::AuthError;
use crate::permissions::Permissions;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

/// Result of a conditional write: the row it needed was missing, or a
/// uniqueness/compare check failed. Nothing is written in either case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Done(T),
    Missing,
    Conflict,
}

/// Embedded redb backend. Every mutation runs in a single write transaction,
/// so indexes never disagree with the primary tables.
pub struct Database {
    db: RedbDatabase,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("user-service.redb");
        let db = RedbDatabase::create(db_path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            // Create tables if they don't exist
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_LOGINS)?;
            let _ = write_txn.open_table(TOKENS)?;
            let _ = write_txn.open_table(REFRESH_TOKENS)?;
            let _ = write_txn.open_table(OWNER_TOKENS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }
}

impl Store for Database {
    fn save_user(&self, user: &NewUser) -> Result<String, AuthError> {
        match self.insert_user(user)? {
            WriteOutcome::Done(id) => Ok(id),
            WriteOutcome::Missing | WriteOutcome::Conflict => Err(AuthError::DuplicateUser),
        }
    }

    fn check_user(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .get_user_by_login(login)?
            .ok_or(AuthError::NoUser)?;
        if verify_password(&user.password_hash, password) {
            Ok(user.id)
        } else {
            Err(AuthError::NoUser)
        }
    }

    fn user(&self, id: &str) -> Result<User, AuthError> {
        self.get_user(id)?.ok_or(AuthError::NoUser)
    }

    fn pop_user(&self, id: &str) -> Result<usize, AuthError> {
        match self.delete_user(id)? {
            WriteOutcome::Done(revoked) => Ok(revoked),
            WriteOutcome::Missing | WriteOutcome::Conflict => Err(AuthError::NoUser),
        }
    }

    fn change_user(&self, change: &UserChange) -> Result<User, AuthError> {
        match self.update_user(change)? {
            WriteOutcome::Done(user) => Ok(user),
            WriteOutcome::Missing => Err(AuthError::NoUser),
            WriteOutcome::Conflict => Err(AuthError::DuplicateUser),
        }
    }

    fn set_permission(&self, id: &str, permissions: Permissions) -> Result<(), AuthError> {
        if self.update_permissions(id, permissions)? {
            Ok(())
        } else {
            Err(AuthError::NoUser)
        }
    }

    fn save_token(&self, token: &Token, owner: &str) -> Result<(), AuthError> {
        let stored = StoredToken {
            owner: owner.to_string(),
            token: token.clone(),
        };
        match self.put_token(&stored)? {
            WriteOutcome::Done(()) => Ok(()),
            WriteOutcome::Missing | WriteOutcome::Conflict => Err(AuthError::NoUser),
        }
    }

    fn check_token(&self, access: &str) -> Result<bool, AuthError> {
        Ok(self.get_token(access)?.is_some())
    }

    fn refresh_in_use(&self, refresh: &str) -> Result<bool, AuthError> {
        Ok(self.refresh_exists(refresh)?)
    }

    fn load_token(&self, access: &str) -> Result<Option<Token>, AuthError> {
        Ok(self.get_token(access)?.map(|stored| stored.token))
    }

    fn get_session_id(&self, access: &str) -> Result<String, AuthError> {
        self.get_token(access)?
            .map(|stored| stored.owner)
            .ok_or(AuthError::TokenExistence)
    }

    fn token_expired(&self, access: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        self.get_token(access)?
            .map(|stored| stored.token.is_expired_at(now))
            .ok_or(AuthError::TokenExistence)
    }

    fn pop_token(&self, access: &str) -> Result<(), AuthError> {
        self.delete_token(access)?;
        Ok(())
    }

    fn replace_token(
        &self,
        access: &str,
        refresh: &str,
        new: &Token,
    ) -> Result<String, AuthError> {
        match self.rotate_token(access, refresh, new)? {
            WriteOutcome::Done(owner) => Ok(owner),
            WriteOutcome::Missing => Err(AuthError::TokenExistence),
            WriteOutcome::Conflict => Err(AuthError::NoRefresh),
        }
    }

    fn load_users(&self) -> Result<Vec<User>, AuthError> {
        Ok(self.get_all_users()?)
    }

    fn load_tokens(&self) -> Result<Vec<StoredToken>, AuthError> {
        Ok(self.get_all_tokens()?)
    }
}
