//! `user.UserService` RPC handlers: the identity surface of the platform.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Json};
use qahub_auth::{accounts, revocation, Claims};
use serde::{Deserialize, Serialize};

use crate::api_notifications::Empty;
use crate::error::{with_conn, RpcError};
use crate::interceptor::Caller;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: i64,
    pub username: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    pub user_id: i64,
    pub username: String,
    pub claims: Claims,
}

/// Handler for `user.UserService/Register`.
pub async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<RegisterResponse>, RpcError> {
    let cost = state.bcrypt_cost;
    let user = with_conn(&state.pool, move |conn| {
        accounts::create_user(conn, &req.username, &req.password, cost)
    })
    .await?;

    Ok(Json(RegisterResponse {
        user_id: user.id,
        username: user.username,
    }))
}

/// Handler for `user.UserService/Login`.
pub async fn login_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, RpcError> {
    let user = with_conn(&state.pool, move |conn| {
        accounts::authenticate(conn, &req.username, &req.password)
    })
    .await?;

    let issued = state
        .tokens
        .issue(user.id, &user.username, state.tokens.default_ttl())?;
    tracing::info!(principal_id = user.id, "login succeeded");

    Ok(Json(LoginResponse {
        token: issued.token,
        user_id: user.id,
        username: user.username,
        expires_at: issued.expires_at,
    }))
}

/// Handler for `user.UserService/Logout`.
///
/// Revokes the caller's token for the rest of its lifetime.
pub async fn logout_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<Empty>, RpcError> {
    let identity = caller.identity();
    let now = qahub_types::time::now_unix();
    let remaining = identity
        .expires_at()
        .map(|exp| exp.saturating_sub(now).max(0))
        .unwrap_or(0);

    let token = identity.token.clone();
    let principal_id = identity.principal_id;
    with_conn(&state.pool, move |conn| {
        revocation::revoke(conn, &token, Duration::from_secs(remaining as u64), now)
    })
    .await?;

    tracing::info!(principal_id, remaining_secs = remaining, "token revoked on logout");
    Ok(Json(Empty {}))
}

/// Handler for `user.UserService/ValidateToken`.
pub async fn validate_token_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ValidateTokenRequest>,
) -> Result<Json<ValidateTokenResponse>, RpcError> {
    let identity = state.tokens.parse(&req.token)?;

    let token = req.token;
    let now = qahub_types::time::now_unix();
    let revoked =
        with_conn(&state.pool, move |conn| revocation::is_revoked(conn, &token, now)).await?;
    if revoked {
        return Err(RpcError::Unauthenticated("token has been revoked".into()));
    }

    Ok(Json(ValidateTokenResponse {
        user_id: identity.principal_id,
        username: identity.username,
        claims: identity.claims,
    }))
}
