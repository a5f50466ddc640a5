mod internal;
mod sessions;
mod users;

use std::sync::Arc;

use serde::Deserialize;

use crate::api::response::ApiError;
use crate::context::Context;
use crate::error::AuthError;
use crate::service::AuthService;
use crate::AppState;

pub use internal::{health, list_users, user_id, user_info, user_permissions};
pub use sessions::{login, logout, refresh};
pub use users::{create_user, delete_user, edit_user, give_permission};

/// Body of every endpoint that only carries an access token
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

/// Reject missing or whitespace-only fields.
fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(())
}

/// Run an engine call on the blocking pool under a fresh request context.
///
/// The context is cancelled if the handler future is dropped (client gone)
/// or the server begins shutting down.
async fn run_engine<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AuthService, &Context) -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    let ctx = state.request_context();
    let guard = ctx.cancellation().clone().drop_guard();
    let state = Arc::clone(state);

    let result = tokio::task::spawn_blocking(move || f(&state.service, &ctx))
        .await
        .map_err(|e| ApiError::internal(format!("Worker task failed: {e}")))?;
    guard.disarm();

    result.map_err(ApiError::from)
}
