//! Notification service: consumes `notification.triggered` events and backs
//! the notification RPCs.

use futures_util::future::BoxFuture;
use qahub_auth::Identity;
use qahub_db::DbPool;
use qahub_events::{ConsumeContext, EventHandler, HandlerError};
use qahub_notify::{ListQuery, MarkTarget, NewNotification, Notification, NotificationPage};
use qahub_types::{EventType, NotificationTriggeredPayload};

use crate::config::Idempotency;
use crate::error::{with_conn, RpcError};
use crate::hub::StreamHub;

/// Resolves the recipient a call may act on. A requested id, if any, must be
/// the caller's own.
pub fn authorize(caller: &Identity, requested: Option<i64>) -> Result<i64, RpcError> {
    match requested {
        Some(id) if id != caller.principal_id => {
            tracing::warn!(
                principal_id = caller.principal_id,
                requested = id,
                "cross-principal notification access denied"
            );
            Err(RpcError::PermissionDenied(
                "cannot access another user's notifications".into(),
            ))
        }
        _ => Ok(caller.principal_id),
    }
}

pub struct NotificationService {
    pool: DbPool,
    hub: StreamHub,
    idempotency: Idempotency,
}

impl NotificationService {
    pub fn new(pool: DbPool, hub: StreamHub, idempotency: Idempotency) -> Self {
        Self {
            pool,
            hub,
            idempotency,
        }
    }

    pub fn hub(&self) -> &StreamHub {
        &self.hub
    }

    /// Stores the notification described by `payload` and pushes it to the
    /// recipient's live stream. Self-triggered payloads are dropped.
    ///
    /// Returns the stored notification, or `None` when nothing was stored.
    pub async fn on_triggered(
        &self,
        ctx: &ConsumeContext,
        payload: NotificationTriggeredPayload,
    ) -> Result<Option<Notification>, HandlerError> {
        if payload.is_self_triggered() {
            tracing::debug!(
                recipient_id = payload.recipient_id,
                event_id = ?ctx.event_id,
                "self-triggered notification dropped"
            );
            return Ok(None);
        }

        let recipient_id = payload.recipient_id;
        let new = NewNotification {
            recipient_id,
            sender_id: payload.sender_id,
            sender_name: payload.sender_name,
            kind: payload.notification_kind,
            content: payload.content,
            target_url: payload.target_url,
            created_at: None,
        };

        let dedup_key = match (self.idempotency, ctx.event_id) {
            (Idempotency::SuppressByEventId, Some(event_id)) => {
                Some((ctx.group.clone(), event_id.to_string()))
            }
            _ => None,
        };

        let stored = with_conn(&self.pool, move |conn| match dedup_key {
            Some((group, event_id)) => qahub_notify::create_for_event(conn, &new, &group, &event_id),
            None => qahub_notify::create(conn, &new).map(Some),
        })
        .await
        .map_err(|e| HandlerError::failed(format!("storing notification: {e}")))?;

        let Some(notification) = stored else {
            tracing::info!(recipient_id, event_id = ?ctx.event_id, "duplicate event suppressed");
            return Ok(None);
        };

        tracing::info!(
            recipient_id,
            notification_id = %notification.id,
            event_id = ?ctx.event_id,
            "notification stored"
        );

        if let Err(e) = self.hub.push(recipient_id, notification.clone()).await {
            tracing::warn!(recipient_id, notification_id = %notification.id, "push skipped: {}", e);
        }
        Ok(Some(notification))
    }

    pub async fn list(
        &self,
        caller: &Identity,
        requested: Option<i64>,
        query: ListQuery,
    ) -> Result<NotificationPage, RpcError> {
        let recipient_id = authorize(caller, requested)?;
        with_conn(&self.pool, move |conn| {
            qahub_notify::list_for(conn, recipient_id, &query)
        })
        .await
    }

    pub async fn unread_count(&self, caller: &Identity, requested: Option<i64>) -> Result<i64, RpcError> {
        let recipient_id = authorize(caller, requested)?;
        with_conn(&self.pool, move |conn| qahub_notify::count_unread(conn, recipient_id)).await
    }

    pub async fn mark_as_read(
        &self,
        caller: &Identity,
        requested: Option<i64>,
        target: MarkTarget,
    ) -> Result<usize, RpcError> {
        let recipient_id = authorize(caller, requested)?;
        with_conn(&self.pool, move |conn| {
            qahub_notify::mark_read_many(conn, recipient_id, &target)
        })
        .await
    }

    pub async fn delete_one(
        &self,
        caller: &Identity,
        requested: Option<i64>,
        id: String,
    ) -> Result<(), RpcError> {
        let recipient_id = authorize(caller, requested)?;
        with_conn(&self.pool, move |conn| qahub_notify::delete_one(conn, recipient_id, &id)).await
    }

    pub async fn delete_many(
        &self,
        caller: &Identity,
        requested: Option<i64>,
        ids: Vec<String>,
    ) -> Result<usize, RpcError> {
        let recipient_id = authorize(caller, requested)?;
        with_conn(&self.pool, move |conn| qahub_notify::delete_many(conn, recipient_id, &ids)).await
    }
}

impl EventHandler for NotificationService {
    fn handle<'a>(
        &'a self,
        ctx: &'a ConsumeContext,
        event_type: EventType,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            if event_type != EventType::NotificationTriggered {
                return Err(HandlerError::failed(format!(
                    "notification service cannot handle {event_type}"
                )));
            }
            let payload: NotificationTriggeredPayload = serde_json::from_slice(payload)?;
            self.on_triggered(ctx, payload).await.map(|_| ())
        })
    }
}
