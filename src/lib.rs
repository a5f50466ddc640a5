//! user-service - identity and session service
//!
//! This crate provides:
//! - User records with unique logins, Argon2id credentials and a permission bitmask
//! - Paired access/refresh tokens with lazy expiry and atomic rotation
//! - Permission-gated user edits and grants
//! - Pluggable storage: in-memory, SQLite, or redb
//! - Public and private REST listeners

pub mod api;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod permissions;
pub mod service;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use config::Config;
use context::Context;
use credentials::CredentialHasher;
use error::AuthError;
use service::AuthService;
use storage::Store;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub service: AuthService,
    /// Cancelled when the process begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, AuthError> {
        let hasher = CredentialHasher::from_config(&config.password)?;
        let service = AuthService::new(store, hasher, config.access_ttl());
        Ok(Self {
            config,
            service,
            shutdown: CancellationToken::new(),
        })
    }

    /// Context for one request: cancelled on shutdown, bounded by the
    /// configured request timeout.
    pub fn request_context(&self) -> Context {
        Context::with_cancellation(self.shutdown.child_token())
            .with_timeout(self.config.request_timeout())
    }
}
