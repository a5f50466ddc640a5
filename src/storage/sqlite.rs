//! SQLite-backed store.
//!
//! Tables:
//! - `users`: id, login, password_hash, permissions
//! - `tokens`: access_token, refresh_token, expiration, user_id

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{NewUser, StoredToken, Token, User, UserChange};
use super::Store;
use crate::credentials::verify_password;
use crate::error::AuthError;
use crate::permissions::Permissions;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        permissions INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS tokens (
        access_token TEXT PRIMARY KEY,
        refresh_token TEXT NOT NULL UNIQUE,
        expiration INTEGER NOT NULL,
        user_id TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, AuthError> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AuthError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuthError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Ids are INTEGER rowids in the table but opaque strings everywhere else.
/// Anything that does not parse cannot name a row.
fn row_id(id: &str) -> Option<i64> {
    id.parse().ok()
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get::<_, i64>(0)?.to_string(),
        login: row.get(1)?,
        password_hash: row.get(2)?,
        permissions: Permissions::from_bits_retain(row.get(3)?),
    })
}

fn token_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredToken> {
    let millis: i64 = row.get(2)?;
    Ok(StoredToken {
        token: Token {
            access: row.get(0)?,
            refresh: row.get(1)?,
            expiration: from_millis(millis),
        },
        owner: row.get(3)?,
    })
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Store for SqliteStore {
    fn save_user(&self, user: &NewUser) -> Result<String, AuthError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO users (login, password_hash, permissions) VALUES (?1, ?2, ?3)
             ON CONFLICT(login) DO NOTHING",
            params![user.login, user.password_hash, user.permissions.bits()],
        )?;

        if inserted == 0 {
            return Err(AuthError::DuplicateUser);
        }
        Ok(conn.last_insert_rowid().to_string())
    }

    fn check_user(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let row: Option<(i64, String)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, password_hash FROM users WHERE login = ?1",
                params![login],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        match row {
            Some((id, hash)) if verify_password(&hash, password) => Ok(id.to_string()),
            _ => Err(AuthError::NoUser),
        }
    }

    fn user(&self, id: &str) -> Result<User, AuthError> {
        let id = row_id(id).ok_or(AuthError::NoUser)?;
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, login, password_hash, permissions FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()?
        .ok_or(AuthError::NoUser)
    }

    fn pop_user(&self, id: &str) -> Result<usize, AuthError> {
        let row = row_id(id).ok_or(AuthError::NoUser)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if tx.execute("DELETE FROM users WHERE id = ?1", params![row])? == 0 {
            return Err(AuthError::NoUser);
        }
        let revoked = tx.execute(
            "DELETE FROM tokens WHERE user_id = ?1",
            params![row.to_string()],
        )?;

        tx.commit()?;
        Ok(revoked)
    }

    fn change_user(&self, change: &UserChange) -> Result<User, AuthError> {
        let id = row_id(&change.id).ok_or(AuthError::NoUser)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                "SELECT id, login, password_hash, permissions FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?
            .ok_or(AuthError::NoUser)?;
        let updated = change.apply(&current);

        let result = tx.execute(
            "UPDATE users SET login = ?1, password_hash = ?2 WHERE id = ?3",
            params![updated.login, updated.password_hash, id],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(AuthError::DuplicateUser),
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        Ok(updated)
    }

    fn set_permission(&self, id: &str, permissions: Permissions) -> Result<(), AuthError> {
        let id = row_id(id).ok_or(AuthError::NoUser)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET permissions = ?1 WHERE id = ?2",
            params![permissions.bits(), id],
        )?;
        if changed == 0 {
            return Err(AuthError::NoUser);
        }
        Ok(())
    }

    fn save_token(&self, token: &Token, owner: &str) -> Result<(), AuthError> {
        let row = row_id(owner).ok_or(AuthError::NoUser)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![row], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(AuthError::NoUser);
        }

        tx.execute(
            "INSERT OR REPLACE INTO tokens (access_token, refresh_token, expiration, user_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                token.access,
                token.refresh,
                token.expiration.timestamp_millis(),
                row.to_string()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn check_token(&self, access: &str) -> Result<bool, AuthError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM tokens WHERE access_token = ?1",
                params![access],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn refresh_in_use(&self, refresh: &str) -> Result<bool, AuthError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM tokens WHERE refresh_token = ?1",
                params![refresh],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn load_token(&self, access: &str) -> Result<Option<Token>, AuthError> {
        let conn = self.conn.lock();
        let stored = conn
            .query_row(
                "SELECT access_token, refresh_token, expiration, user_id
                 FROM tokens WHERE access_token = ?1",
                params![access],
                token_from_row,
            )
            .optional()?;
        Ok(stored.map(|s| s.token))
    }

    fn get_session_id(&self, access: &str) -> Result<String, AuthError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id FROM tokens WHERE access_token = ?1",
            params![access],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(AuthError::TokenExistence)
    }

    fn token_expired(&self, access: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        let conn = self.conn.lock();
        let expiration: i64 = conn
            .query_row(
                "SELECT expiration FROM tokens WHERE access_token = ?1",
                params![access],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(AuthError::TokenExistence)?;
        Ok(now > from_millis(expiration))
    }

    fn pop_token(&self, access: &str) -> Result<(), AuthError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tokens WHERE access_token = ?1", params![access])?;
        Ok(())
    }

    fn replace_token(
        &self,
        access: &str,
        refresh: &str,
        new: &Token,
    ) -> Result<String, AuthError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let (stored_refresh, owner): (String, String) = tx
            .query_row(
                "SELECT refresh_token, user_id FROM tokens WHERE access_token = ?1",
                params![access],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(AuthError::TokenExistence)?;
        if stored_refresh != refresh {
            return Err(AuthError::NoRefresh);
        }

        tx.execute("DELETE FROM tokens WHERE access_token = ?1", params![access])?;
        tx.execute(
            "INSERT INTO tokens (access_token, refresh_token, expiration, user_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.access,
                new.refresh,
                new.expiration.timestamp_millis(),
                owner
            ],
        )?;
        tx.commit()?;
        Ok(owner)
    }

    fn load_users(&self) -> Result<Vec<User>, AuthError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, login, password_hash, permissions FROM users")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn load_tokens(&self) -> Result<Vec<StoredToken>, AuthError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT access_token, refresh_token, expiration, user_id FROM tokens")?;
        let tokens = stmt
            .query_map([], token_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }
}
