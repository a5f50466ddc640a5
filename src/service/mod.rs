//! The session/permission engine.
//!
//! `AuthService` owns the business rules: credential checks, token issue,
//! lazy expiry, rotation and permission gates. It drives an injected
//! [`Store`] and never touches the network. All operations are synchronous;
//! async callers should run them on a blocking thread.

mod tokens;
mod users;

use std::sync::Arc;

use chrono::Duration;

use crate::credentials::CredentialHasher;
use crate::storage::Store;

pub use users::UserUpdate;

pub struct AuthService {
    store: Arc<dyn Store>,
    hasher: CredentialHasher,
    access_ttl: Duration,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, hasher: CredentialHasher, access_ttl: Duration) -> Self {
        Self {
            store,
            hasher,
            access_ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }
}
