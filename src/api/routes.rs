use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

/// Routes served to clients: accounts, login, refresh, logout.
pub fn public_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/user/create", post(handlers::create_user))
        .route("/user/delete", post(handlers::delete_user))
        .route("/user/edit", post(handlers::edit_user))
        .route("/user/give", post(handlers::give_permission))
        .route("/user/login", post(handlers::login))
        .route("/user/logout", post(handlers::logout))
        .route("/user/refresh", post(handlers::refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Routes for trusted backends only. Bind these to a firewalled address.
pub fn private_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/user/id", post(handlers::user_id))
        .route("/user/info", post(handlers::user_info))
        .route("/user/list", post(handlers::list_users))
        .route("/user/permissions", post(handlers::user_permissions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
