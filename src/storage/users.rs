use redb::ReadableTable;

use super::db::{Database, DatabaseError, WriteOutcome};
use super::models::{NewUser, User, UserChange};
use super::tables::*;
use super::tokens::remove_owner_tokens_in;
use crate::permissions::Permissions;

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Insert a user under a fresh UUID unless the login is already indexed.
    pub fn insert_user(&self, user: &NewUser) -> Result<WriteOutcome<String>, DatabaseError> {
        debug_assert!(!user.login.is_empty(), "login must not be empty");

        let write_txn = self.begin_write()?;
        let outcome = {
            let mut logins = write_txn.open_table(USER_LOGINS)?;
            let taken = logins.get(user.login.as_str())?.is_some();

            if taken {
                WriteOutcome::Conflict
            } else {
                let id = uuid::Uuid::new_v4().to_string();
                let record = User {
                    id: id.clone(),
                    login: user.login.clone(),
                    password_hash: user.password_hash.clone(),
                    permissions: user.permissions,
                };

                let mut users = write_txn.open_table(USERS)?;
                let data = rmp_serde::to_vec_named(&record)?;
                users.insert(id.as_str(), data.as_slice())?;
                logins.insert(user.login.as_str(), id.as_str())?;
                WriteOutcome::Done(id)
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Get a user by id
    pub fn get_user(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(id)? {
            Some(data) => {
                let user: User = rmp_serde::from_slice(data.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Resolve a login through the login index
    pub fn get_user_by_login(&self, login: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let logins = read_txn.open_table(USER_LOGINS)?;
        let users = read_txn.open_table(USERS)?;

        let id = match logins.get(login)? {
            Some(id) => id.value().to_string(),
            None => return Ok(None),
        };

        match users.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Delete a user, its login index entry and every token it owns in one
    /// transaction. Returns how many tokens were removed.
    pub fn delete_user(&self, id: &str) -> Result<WriteOutcome<usize>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut users = write_txn.open_table(USERS)?;
            let user: Option<User> = match users.remove(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match user {
                Some(user) => {
                    let mut logins = write_txn.open_table(USER_LOGINS)?;
                    logins.remove(user.login.as_str())?;
                    true
                }
                None => false,
            }
        };

        let outcome = if deleted {
            WriteOutcome::Done(remove_owner_tokens_in(&write_txn, id)?)
        } else {
            WriteOutcome::Missing
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Change login and/or password hash. Permissions are preserved.
    pub fn update_user(&self, change: &UserChange) -> Result<WriteOutcome<User>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let outcome = {
            let mut users = write_txn.open_table(USERS)?;
            let current: Option<User> = match users.get(change.id.as_str())? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match current {
                None => WriteOutcome::Missing,
                Some(current) => {
                    let updated = change.apply(&current);
                    let mut logins = write_txn.open_table(USER_LOGINS)?;

                    let conflict = updated.login != current.login
                        && logins.get(updated.login.as_str())?.is_some();
                    if conflict {
                        WriteOutcome::Conflict
                    } else {
                        if updated.login != current.login {
                            logins.remove(current.login.as_str())?;
                            logins.insert(updated.login.as_str(), updated.id.as_str())?;
                        }
                        let data = rmp_serde::to_vec_named(&updated)?;
                        users.insert(updated.id.as_str(), data.as_slice())?;
                        WriteOutcome::Done(updated)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Overwrite the permission bitmask. Returns false for an unknown id.
    pub fn update_permissions(
        &self,
        id: &str,
        permissions: Permissions,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut users = write_txn.open_table(USERS)?;
            let existing: Option<User> = match users.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match existing {
                Some(mut user) => {
                    user.permissions = permissions;
                    let data = rmp_serde::to_vec_named(&user)?;
                    users.insert(id, data.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Get all users
    pub fn get_all_users(&self) -> Result<Vec<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        let mut users = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let user: User = rmp_serde::from_slice(value.value())?;
            users.push(user);
        }

        Ok(users)
    }
}
