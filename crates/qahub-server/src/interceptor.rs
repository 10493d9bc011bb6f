//! Auth interceptor: authenticates every RPC not on the public allow-list.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use qahub_auth::{revocation, Identity};

use crate::error::{with_conn, RpcError};
use crate::AppState;

/// The authenticated principal of the current call, as attached by
/// [`auth_interceptor`]. Extracting it on a public route fails with
/// `unauthenticated`.
#[derive(Debug, Clone)]
pub struct Caller(pub Arc<Identity>);

impl Caller {
    pub fn identity(&self) -> &Identity {
        &self.0
    }

    pub fn principal_id(&self) -> i64 {
        self.0.principal_id
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = RpcError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| RpcError::Unauthenticated("no authenticated identity".into()))
    }
}

/// Middleware run in front of every RPC route.
///
/// Public methods pass through untouched. Anything else needs
/// `authorization: Bearer <token>` with a valid, unrevoked token; the
/// decoded [`Caller`] is attached to the request extensions.
pub async fn auth_interceptor(mut req: Request<Body>, next: Next) -> Result<Response, RpcError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| RpcError::Internal("application state missing".into()))?;

    let method = req.uri().path().trim_start_matches('/');
    if state.public_methods.contains(method) {
        return Ok(next.run(req).await);
    }

    let token = bearer_token(req.headers())?;
    let identity = state.tokens.parse(&token).map_err(|e| {
        tracing::debug!(method, error = %e, "token rejected");
        RpcError::Unauthenticated(format!("invalid token: {e}"))
    })?;

    let revoked = {
        let token = token.clone();
        let now = qahub_types::time::now_unix();
        with_conn(&state.pool, move |conn| revocation::is_revoked(conn, &token, now)).await?
    };
    if revoked {
        tracing::debug!(method, principal_id = identity.principal_id, "revoked token presented");
        return Err(RpcError::Unauthenticated("token has been revoked".into()));
    }

    req.extensions_mut().insert(Caller(Arc::new(identity)));
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<String, RpcError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| RpcError::Unauthenticated("missing authorization metadata".into()))?
        .to_str()
        .map_err(|_| RpcError::Unauthenticated("authorization header is not valid text".into()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| RpcError::Unauthenticated("authorization must use the Bearer scheme".into()))
}
