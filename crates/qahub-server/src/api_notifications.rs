//! `notification.NotificationService` RPC handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Extension, Json},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use qahub_notify::{ListQuery, MarkTarget, Notification, PageRequest};
use qahub_types::time::{render_local, WireTimestamp};
use qahub_types::{NotificationKind, NotificationStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::RpcError;
use crate::hub::{StreamHub, Subscription};
use crate::interceptor::Caller;
use crate::notification_service::authorize;
use crate::AppState;

/// A notification as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub recipient_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub kind: NotificationKind,
    pub content: String,
    pub target_url: String,
    pub status: NotificationStatus,
    pub created_at: WireTimestamp,
    /// `created_at` as `YYYY-MM-DD HH:MM:SS` in the server's local zone.
    pub created_at_display: String,
}

impl From<Notification> for NotificationMessage {
    fn from(n: Notification) -> Self {
        Self {
            created_at: WireTimestamp::from(n.created_at),
            created_at_display: render_local(n.created_at),
            id: n.id,
            recipient_id: n.recipient_id,
            sender_id: n.sender_id,
            sender_name: n.sender_name,
            kind: n.kind,
            content: n.content,
            target_url: n.target_url,
            status: n.status,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GetNotificationsRequest {
    pub user_id: Option<i64>,
    pub page: i64,
    pub page_size: i64,
    pub unread_only: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetNotificationsResponse {
    pub notifications: Vec<NotificationMessage>,
    pub total: i64,
    pub unread_count: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserScopedRequest {
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetUnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MarkAsReadRequest {
    pub user_id: Option<i64>,
    pub notification_ids: Vec<String>,
    pub mark_all: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkAsReadResponse {
    pub modified_count: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteNotificationRequest {
    pub user_id: Option<i64>,
    pub notification_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteNotificationsRequest {
    pub user_id: Option<i64>,
    pub notification_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteNotificationsResponse {
    pub deleted_count: usize,
}

/// Handler for `notification.NotificationService/GetNotifications`.
pub async fn get_notifications_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<GetNotificationsRequest>,
) -> Result<Json<GetNotificationsResponse>, RpcError> {
    let query = ListQuery {
        page: PageRequest::new(req.page, req.page_size),
        unread_only: req.unread_only,
    };
    let page = state
        .notifications
        .list(caller.identity(), req.user_id, query)
        .await?;

    Ok(Json(GetNotificationsResponse {
        notifications: page.items.into_iter().map(NotificationMessage::from).collect(),
        total: page.total,
        unread_count: page.unread_count,
        page: page.page,
        page_size: page.page_size,
    }))
}

/// Handler for `notification.NotificationService/GetUnreadCount`.
pub async fn get_unread_count_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<UserScopedRequest>,
) -> Result<Json<GetUnreadCountResponse>, RpcError> {
    let unread_count = state
        .notifications
        .unread_count(caller.identity(), req.user_id)
        .await?;
    Ok(Json(GetUnreadCountResponse { unread_count }))
}

/// Handler for `notification.NotificationService/MarkAsRead`.
///
/// `mark_all` wins over `notification_ids`.
pub async fn mark_as_read_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<MarkAsReadRequest>,
) -> Result<Json<MarkAsReadResponse>, RpcError> {
    let target = if req.mark_all {
        MarkTarget::All
    } else {
        MarkTarget::Ids(req.notification_ids)
    };
    let modified_count = state
        .notifications
        .mark_as_read(caller.identity(), req.user_id, target)
        .await?;
    Ok(Json(MarkAsReadResponse { modified_count }))
}

/// Handler for `notification.NotificationService/DeleteNotification`.
pub async fn delete_notification_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<DeleteNotificationRequest>,
) -> Result<Json<Empty>, RpcError> {
    if req.notification_id.is_empty() {
        return Err(RpcError::InvalidArgument("notification_id is required".into()));
    }
    state
        .notifications
        .delete_one(caller.identity(), req.user_id, req.notification_id)
        .await?;
    Ok(Json(Empty {}))
}

/// Handler for `notification.NotificationService/DeleteNotifications`.
pub async fn delete_notifications_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<DeleteNotificationsRequest>,
) -> Result<Json<DeleteNotificationsResponse>, RpcError> {
    let deleted_count = state
        .notifications
        .delete_many(caller.identity(), req.user_id, req.notification_ids)
        .await?;
    Ok(Json(DeleteNotificationsResponse { deleted_count }))
}

/// Unregisters the stream when the response body is dropped, whichever way
/// the stream ended.
struct StreamGuard {
    hub: StreamHub,
    recipient_id: i64,
    session_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.hub.try_unregister(self.recipient_id, self.session_id) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let hub = self.hub.clone();
            let (recipient_id, session_id) = (self.recipient_id, self.session_id);
            handle.spawn(async move { hub.unregister(recipient_id, session_id).await });
        }
    }
}

struct LiveStream {
    sub: Subscription,
    shutdown: watch::Receiver<bool>,
    _guard: StreamGuard,
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn frame(notification: Notification) -> Option<Event> {
    let id = notification.id.clone();
    match Event::default()
        .event("notification")
        .json_data(NotificationMessage::from(notification))
    {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::error!(notification_id = %id, "failed to encode notification frame: {}", e);
            None
        }
    }
}

/// Handler for `notification.NotificationService/SubscribeNotifications`.
///
/// Registers the caller with the Stream Hub and streams each pushed
/// notification as an SSE `notification` event. The response ends when the
/// hub supersedes or drops the stream, or the server shuts down; a client
/// disconnect drops the body and unregisters.
pub async fn subscribe_notifications_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<UserScopedRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RpcError> {
    let recipient_id = authorize(caller.identity(), req.user_id)?;
    let hub = state.notifications.hub().clone();

    let sub = hub
        .register(recipient_id)
        .await
        .map_err(|e| RpcError::Unavailable(e.to_string()))?;
    tracing::info!(recipient_id, session_id = %sub.session_id, "notification stream opened");

    let live = LiveStream {
        _guard: StreamGuard {
            hub,
            recipient_id,
            session_id: sub.session_id,
        },
        sub,
        shutdown: state.shutdown.clone(),
    };

    let stream = futures_util::stream::unfold(live, |mut live| async move {
        loop {
            tokio::select! {
                biased;

                reason = &mut live.sub.done => {
                    tracing::info!(
                        recipient_id = live.sub.recipient_id,
                        session_id = %live.sub.session_id,
                        reason = ?reason.ok(),
                        "notification stream closed by hub"
                    );
                    return None;
                }
                () = shutdown_requested(&mut live.shutdown) => {
                    return None;
                }
                next = live.sub.frames.recv() => {
                    let notification = next?;
                    if let Some(event) = frame(notification) {
                        return Some((Ok(event), live));
                    }
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}
