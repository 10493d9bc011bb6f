//! RPC error kinds and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qahub_auth::{AuthError, TokenError};
use qahub_db::DbPool;
use qahub_notify::NotifyError;
use rusqlite::Connection;
use serde_json::json;
use thiserror::Error;

/// Error returned by every RPC, rendered as `{"code", "message"}`.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Unauthenticated(_) => "unauthenticated",
            RpcError::PermissionDenied(_) => "permission_denied",
            RpcError::InvalidArgument(_) => "invalid_argument",
            RpcError::NotFound(_) => "not_found",
            RpcError::AlreadyExists(_) => "already_exists",
            RpcError::Unavailable(_) => "unavailable",
            RpcError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RpcError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            RpcError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RpcError::NotFound(_) => StatusCode::NOT_FOUND,
            RpcError::AlreadyExists(_) => StatusCode::CONFLICT,
            RpcError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RpcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            RpcError::Unauthenticated(m)
            | RpcError::PermissionDenied(m)
            | RpcError::InvalidArgument(m)
            | RpcError::NotFound(m)
            | RpcError::AlreadyExists(m)
            | RpcError::Unavailable(m)
            | RpcError::Internal(m) => m,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        match &self {
            RpcError::Internal(_) => tracing::error!(error = %self, "rpc failed"),
            RpcError::Unavailable(_) => tracing::warn!(error = %self, "rpc failed"),
            _ => tracing::debug!(error = %self, "rpc rejected"),
        }

        let body = Json(json!({
            "code": self.code(),
            "message": self.message(),
        }));
        (self.status(), body).into_response()
    }
}

fn database_error(e: rusqlite::Error) -> RpcError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            RpcError::Unavailable(format!("store busy: {e}"))
        }
        _ => RpcError::Internal(format!("store error: {e}")),
    }
}

impl From<NotifyError> for RpcError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::Database(e) => database_error(e),
            NotifyError::NotFound(id) => RpcError::NotFound(format!("notification {id}")),
            NotifyError::InvalidId(id) => {
                RpcError::InvalidArgument(format!("malformed notification id: {id:?}"))
            }
        }
    }
}

impl From<TokenError> for RpcError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::InvalidTtl | TokenError::EmptySecret => RpcError::Internal(e.to_string()),
            other => RpcError::Unauthenticated(other.to_string()),
        }
    }
}

impl From<AuthError> for RpcError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Database(e) => database_error(e),
            AuthError::Token(e) => e.into(),
            AuthError::Password(e) => RpcError::Internal(format!("password hashing: {e}")),
            AuthError::InvalidCredentials => {
                RpcError::Unauthenticated("invalid username or password".into())
            }
            AuthError::UsernameTaken(name) => {
                RpcError::AlreadyExists(format!("username {name:?} is taken"))
            }
            AuthError::InvalidInput(msg) => RpcError::InvalidArgument(msg),
            AuthError::UserNotFound(id) => RpcError::NotFound(format!("user {id}")),
        }
    }
}

/// Runs `f` against a pooled connection on the blocking thread pool.
pub async fn with_conn<T, E, F>(pool: &DbPool, f: F) -> Result<T, RpcError>
where
    F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<RpcError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| RpcError::Unavailable(format!("database connection failed: {e}")))?;
        f(&conn).map_err(Into::into)
    })
    .await
    .map_err(|e| RpcError::Internal(format!("blocking task failed: {e}")))?
}
