use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{require, run_engine, TokenRequest};
use crate::api::response::{ApiError, AppJson, JSend};
use crate::storage::models::Token;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access: String,
    pub expiration: String,
    pub refresh: String,
}

impl From<Token> for TokenResponse {
    fn from(token: Token) -> Self {
        Self {
            access: token.access,
            expiration: token.expiration.to_rfc3339(),
            refresh: token.refresh,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<(StatusCode, Json<JSend<TokenResponse>>), ApiError> {
    require("login", &req.login)?;
    require("password", &req.password)?;

    let token = run_engine(&state, move |service, ctx| {
        service.create_token(ctx, &req.login, &req.password)
    })
    .await?;

    Ok(JSend::with_status(StatusCode::FOUND, TokenResponse::from(token)))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RefreshRequest>,
) -> Result<(StatusCode, Json<JSend<TokenResponse>>), ApiError> {
    require("access", &req.access)?;
    require("refresh", &req.refresh)?;

    let token = run_engine(&state, move |service, ctx| {
        service.refresh_token(ctx, &req.access, &req.refresh)
    })
    .await?;

    Ok(JSend::with_status(StatusCode::FOUND, TokenResponse::from(token)))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<Json<JSend<LogoutResponse>>, ApiError> {
    require("token", &req.token)?;

    run_engine(&state, move |service, ctx| service.delete_token(ctx, &req.token)).await?;

    Ok(JSend::success(LogoutResponse { revoked: true }))
}
