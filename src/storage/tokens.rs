use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError, WriteOutcome};
use super::models::{StoredToken, Token};
use super::tables::*;

impl Database {
    // ========================================================================
    // Token operations
    // ========================================================================

    /// Store a token, replacing any token with the same access value.
    /// `Missing` if the owner is not a stored user.
    pub fn put_token(&self, stored: &StoredToken) -> Result<WriteOutcome<()>, DatabaseError> {
        debug_assert!(!stored.token.access.is_empty(), "access must not be empty");
        debug_assert!(!stored.owner.is_empty(), "owner must not be empty");

        let write_txn = self.begin_write()?;
        let owner_exists = {
            let users = write_txn.open_table(USERS)?;
            let found = users.get(stored.owner.as_str())?.is_some();
            found
        };

        let outcome = if owner_exists {
            remove_token_in(&write_txn, &stored.token.access)?;
            insert_token_in(&write_txn, stored)?;
            WriteOutcome::Done(())
        } else {
            WriteOutcome::Missing
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Get a token by its access value
    pub fn get_token(&self, access: &str) -> Result<Option<StoredToken>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;

        match table.get(access)? {
            Some(data) => {
                let stored: StoredToken = rmp_serde::from_slice(data.value())?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Whether a refresh value is indexed
    pub fn refresh_exists(&self, refresh: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(REFRESH_TOKENS)?;
        Ok(table.get(refresh)?.is_some())
    }

    /// Delete a token by its access value
    pub fn delete_token(&self, access: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = remove_token_in(&write_txn, access)?.is_some();
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Swap the token at `access` for `new` if `refresh` matches, in one
    /// transaction. The owner carries over to the new token.
    pub fn rotate_token(
        &self,
        access: &str,
        refresh: &str,
        new: &Token,
    ) -> Result<WriteOutcome<String>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let current: Option<StoredToken> = {
            let table = write_txn.open_table(TOKENS)?;
            let result = table.get(access)?;
            match result {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let outcome = match current {
            None => WriteOutcome::Missing,
            Some(current) if current.token.refresh != refresh => WriteOutcome::Conflict,
            Some(current) => {
                remove_token_in(&write_txn, access)?;
                insert_token_in(
                    &write_txn,
                    &StoredToken {
                        owner: current.owner.clone(),
                        token: new.clone(),
                    },
                )?;
                WriteOutcome::Done(current.owner)
            }
        };

        write_txn.commit()?;
        Ok(outcome)
    }

    /// Get all tokens
    pub fn get_all_tokens(&self) -> Result<Vec<StoredToken>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;

        let mut tokens = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let stored: StoredToken = rmp_serde::from_slice(value.value())?;
            tokens.push(stored);
        }

        Ok(tokens)
    }
}

/// Insert a token and its refresh/owner index entries.
/// The caller must not hold any of the token tables open.
fn insert_token_in(write_txn: &WriteTransaction, stored: &StoredToken) -> Result<(), DatabaseError> {
    let access = stored.token.access.as_str();

    let mut table = write_txn.open_table(TOKENS)?;
    let data = rmp_serde::to_vec_named(stored)?;
    table.insert(access, data.as_slice())?;

    let mut refresh_table = write_txn.open_table(REFRESH_TOKENS)?;
    refresh_table.insert(stored.token.refresh.as_str(), access)?;

    let mut index_table = write_txn.open_table(OWNER_TOKENS)?;
    let mut accesses: Vec<String> = index_table
        .get(stored.owner.as_str())?
        .map(|v| rmp_serde::from_slice(v.value()))
        .transpose()?
        .unwrap_or_default();

    if !accesses.iter().any(|a| a == access) {
        accesses.push(access.to_string());
        let index_data = rmp_serde::to_vec_named(&accesses)?;
        index_table.insert(stored.owner.as_str(), index_data.as_slice())?;
    }

    Ok(())
}

/// Remove every token bound to `owner` through the owner index. Returns how
/// many were removed. The caller must not hold any of the token tables open.
pub(super) fn remove_owner_tokens_in(
    write_txn: &WriteTransaction,
    owner: &str,
) -> Result<usize, DatabaseError> {
    let accesses: Vec<String> = {
        let index_table = write_txn.open_table(OWNER_TOKENS)?;
        let result = index_table.get(owner)?;
        match result {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => Vec::new(),
        }
    };

    let mut removed = 0;
    for access in &accesses {
        if remove_token_in(write_txn, access)?.is_some() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove a token and clean up its index entries. Returns the removed token.
/// The caller must not hold any of the token tables open.
fn remove_token_in(
    write_txn: &WriteTransaction,
    access: &str,
) -> Result<Option<StoredToken>, DatabaseError> {
    let stored: Option<StoredToken> = {
        let mut table = write_txn.open_table(TOKENS)?;
        let result = table.remove(access)?;
        match result {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        }
    };

    let Some(stored) = stored else {
        return Ok(None);
    };

    {
        let mut refresh_table = write_txn.open_table(REFRESH_TOKENS)?;
        refresh_table.remove(stored.token.refresh.as_str())?;
    }

    // Update owner_tokens index
    let accesses: Option<Vec<String>> = {
        let index_table = write_txn.open_table(OWNER_TOKENS)?;
        let result = index_table.get(stored.owner.as_str())?;
        match result {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        }
    };

    if let Some(mut a) = accesses {
        a.retain(|v| v != access);
        let mut index_table = write_txn.open_table(OWNER_TOKENS)?;
        if a.is_empty() {
            index_table.remove(stored.owner.as_str())?;
        } else {
            let new_index_data = rmp_serde::to_vec_named(&a)?;
            index_table.insert(stored.owner.as_str(), new_index_data.as_slice())?;
        }
    }

    Ok(Some(stored))
}
