use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{require, run_engine, TokenRequest};
use crate::api::response::{ApiError, AppJson, JSend};
use crate::service::UserUpdate;
use crate::storage::models::User;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserIdResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct EditUserRequest {
    pub id: String,
    #[serde(default, rename = "newLogin")]
    pub new_login: Option<String>,
    #[serde(default, rename = "newPassword")]
    pub new_password: Option<String>,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct GivePermissionRequest {
    pub id: String,
    pub permission: u32,
    pub token: String,
}

/// A user as exposed over HTTP; the password hash never leaves the service
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub login: String,
    pub permission_names: Vec<String>,
    pub permissions: u32,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            login: user.login,
            permission_names: user
                .permissions
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
            permissions: user.permissions.bits(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub permissions: u32,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<JSend<UserIdResponse>>), ApiError> {
    require("login", &req.login)?;
    require("password", &req.password)?;

    let id = run_engine(&state, move |service, ctx| {
        service.new_user(ctx, &req.login, &req.password)
    })
    .await?;

    Ok(JSend::with_status(StatusCode::CREATED, UserIdResponse { id }))
}

/// Delete the account the token belongs to.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<Json<JSend<UserIdResponse>>, ApiError> {
    require("token", &req.token)?;

    let id = run_engine(&state, move |service, ctx| {
        let id = service.get_id_by_token(ctx, &req.token)?;
        service.delete_user(ctx, &id)?;
        Ok(id)
    })
    .await?;

    Ok(JSend::success(UserIdResponse { id }))
}

pub async fn edit_user(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<EditUserRequest>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    require("token", &req.token)?;
    require("id", &req.id)?;

    let update = UserUpdate {
        login: req.new_login.filter(|l| !l.trim().is_empty()),
        password: req.new_password.filter(|p| !p.is_empty()),
    };
    if update.login.is_none() && update.password.is_none() {
        return Err(ApiError::bad_request(
            "newLogin or newPassword is required",
        ));
    }

    let token = req.token;
    let id = req.id;
    let user = run_engine(&state, move |service, ctx| {
        service.edit_user(ctx, &token, &id, update)
    })
    .await?;

    Ok(JSend::success(UserResponse::from(user)))
}

pub async fn give_permission(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<GivePermissionRequest>,
) -> Result<Json<JSend<PermissionsResponse>>, ApiError> {
    require("token", &req.token)?;
    require("id", &req.id)?;

    let bits = req.permission;
    run_engine(&state, move |service, ctx| {
        service.give_permission(ctx, &req.token, &req.id, bits)
    })
    .await?;

    Ok(JSend::success(PermissionsResponse { permissions: bits }))
}
