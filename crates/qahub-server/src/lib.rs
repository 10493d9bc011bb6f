//! QAHub server library logic.
//!
//! Every RPC is served as `POST /<package>.<Service>/<Method>` with JSON
//! bodies. The auth interceptor runs in front of all of them; `/health`
//! sits outside it.

pub mod api_notifications;
pub mod api_users;
pub mod background;
pub mod config;
pub mod error;
pub mod hub;
pub mod interceptor;
pub mod notification_service;
pub mod originator;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use qahub_auth::{TokenAuthority, TokenError};
use qahub_db::DbPool;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::RpcError;
pub use interceptor::Caller;

use config::Config;
use hub::{HubConfig, StreamHub};
use notification_service::NotificationService;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Issues and validates bearer tokens.
    pub tokens: Arc<TokenAuthority>,
    /// Fully qualified methods the interceptor lets through unauthenticated.
    pub public_methods: Arc<HashSet<String>>,
    /// Notification store access plus the Stream Hub.
    pub notifications: Arc<NotificationService>,
    pub bcrypt_cost: u32,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
    /// Flips to `true` once the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Builds the state from configuration and spawns the Stream Hub.
    ///
    /// Returns the hub's task handle alongside the state; the hub exits when
    /// `shutdown` turns true.
    pub fn from_config(
        config: &Config,
        pool: DbPool,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, JoinHandle<()>), TokenError> {
        let tokens = TokenAuthority::new(config.auth.token_secret.as_bytes(), config.auth.token_ttl())?;

        let (hub, hub_task) = StreamHub::spawn(
            HubConfig {
                client_buffer: config.hub.client_buffer,
                mailbox_capacity: config.hub.mailbox_capacity,
            },
            shutdown.clone(),
        );
        let notifications = Arc::new(NotificationService::new(
            pool.clone(),
            hub,
            config.notifications.idempotency,
        ));

        let state = Self {
            pool,
            tokens: Arc::new(tokens),
            public_methods: Arc::new(config.auth.public_methods.iter().cloned().collect()),
            notifications,
            bcrypt_cost: config.auth.bcrypt_cost,
            keep_alive: Duration::from_secs(config.hub.keep_alive_secs.max(1)),
            shutdown,
        };
        Ok((state, hub_task))
    }
}

/// Health check handler.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let rpc_routes = Router::new()
        .route("/user.UserService/Register", post(api_users::register_handler))
        .route("/user.UserService/Login", post(api_users::login_handler))
        .route("/user.UserService/Logout", post(api_users::logout_handler))
        .route(
            "/user.UserService/ValidateToken",
            post(api_users::validate_token_handler),
        )
        .route(
            "/notification.NotificationService/GetNotifications",
            post(api_notifications::get_notifications_handler),
        )
        .route(
            "/notification.NotificationService/GetUnreadCount",
            post(api_notifications::get_unread_count_handler),
        )
        .route(
            "/notification.NotificationService/MarkAsRead",
            post(api_notifications::mark_as_read_handler),
        )
        .route(
            "/notification.NotificationService/DeleteNotification",
            post(api_notifications::delete_notification_handler),
        )
        .route(
            "/notification.NotificationService/DeleteNotifications",
            post(api_notifications::delete_notifications_handler),
        )
        .route(
            "/notification.NotificationService/SubscribeNotifications",
            post(api_notifications::subscribe_notifications_handler),
        )
        .layer(axum::middleware::from_fn(interceptor::auth_interceptor));

    Router::new()
        .route("/health", get(health))
        .merge(rpc_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
