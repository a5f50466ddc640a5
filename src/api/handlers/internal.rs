//! Private-listener handlers: token resolution and introspection for
//! trusted backends.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use super::users::{PermissionsResponse, UserIdResponse, UserResponse};
use super::{require, run_engine, TokenRequest};
use crate::api::response::{ApiError, AppJson, JSend};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub live_sessions: usize,
    pub status: String,
}

pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<HealthResponse>>, ApiError> {
    let live_sessions = run_engine(&state, |service, ctx| service.live_sessions(ctx)).await?;

    Ok(JSend::success(HealthResponse {
        live_sessions,
        status: "healthy".to_string(),
    }))
}

pub async fn user_id(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<Json<JSend<UserIdResponse>>, ApiError> {
    require("token", &req.token)?;

    let id = run_engine(&state, move |service, ctx| {
        service.get_id_by_token(ctx, &req.token)
    })
    .await?;

    Ok(JSend::success(UserIdResponse { id }))
}

pub async fn user_permissions(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<Json<JSend<PermissionsResponse>>, ApiError> {
    require("token", &req.token)?;

    let user = run_engine(&state, move |service, ctx| {
        let id = service.get_id_by_token(ctx, &req.token)?;
        service.user_info(ctx, &id)
    })
    .await?;

    Ok(JSend::success(PermissionsResponse {
        permissions: user.permissions.bits(),
    }))
}

pub async fn user_info(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    require("token", &req.token)?;

    let user = run_engine(&state, move |service, ctx| {
        let id = service.get_id_by_token(ctx, &req.token)?;
        service.user_info(ctx, &id)
    })
    .await?;

    Ok(JSend::success(UserResponse::from(user)))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<Json<JSend<Vec<UserResponse>>>, ApiError> {
    require("token", &req.token)?;

    let mut users = run_engine(&state, move |service, ctx| {
        service.list_users(ctx, &req.token)
    })
    .await?;
    users.sort_by(|a, b| a.login.cmp(&b.login));

    Ok(JSend::success(users.into_iter().map(UserResponse::from).collect()))
}
