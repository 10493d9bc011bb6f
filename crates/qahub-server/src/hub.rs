//! Stream Hub: routes freshly stored notifications to live streams.
//!
//! One coordinator task owns the `recipient_id -> client` map. Everything
//! else talks to it through three bounded mailboxes (register, unregister,
//! broadcast), so map mutations are serialized and linearizable in the order
//! the coordinator receives them.
//!
//! Policies:
//! - At most one stream per recipient. A new registration supersedes the
//!   old one, whose `done` fires before the new stream can receive a frame.
//! - Each stream has a bounded frame buffer. A broadcast that finds it full
//!   disconnects the stream instead of waiting; the client reconnects and
//!   pages through what it missed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use qahub_notify::Notification;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Why a stream was ended by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The same recipient opened a newer stream.
    Superseded,
    /// The frame buffer was full.
    Lagging,
    /// The stream's receiving side was already gone.
    SinkClosed,
    /// The stream unregistered itself.
    Unregistered,
    ServerShutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub client_buffer: usize,
    pub mailbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer: 256,
            mailbox_capacity: 128,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("stream hub is not running")]
pub struct HubClosed;

/// The receiving half of a registered stream.
#[derive(Debug)]
pub struct Subscription {
    pub recipient_id: i64,
    pub session_id: Uuid,
    pub frames: mpsc::Receiver<Notification>,
    pub done: oneshot::Receiver<DoneReason>,
}

struct ClientEntry {
    session_id: Uuid,
    sink: mpsc::Sender<Notification>,
    done: oneshot::Sender<DoneReason>,
}

impl ClientEntry {
    fn finish(self, reason: DoneReason) {
        // The receiver may already be gone; nothing to tell it then.
        let _ = self.done.send(reason);
    }
}

struct Register {
    recipient_id: i64,
    entry: ClientEntry,
    ack: oneshot::Sender<()>,
}

struct Unregister {
    recipient_id: i64,
    session_id: Uuid,
}

struct Broadcast {
    recipient_id: i64,
    notification: Notification,
}

/// Cloneable handle to the hub coordinator.
#[derive(Clone)]
pub struct StreamHub {
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::Sender<Unregister>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    count: Arc<AtomicUsize>,
    client_buffer: usize,
}

impl StreamHub {
    /// Starts the coordinator. It stops when `shutdown` turns true, ending
    /// every open stream with [`DoneReason::ServerShutdown`].
    pub fn spawn(config: HubConfig, shutdown: watch::Receiver<bool>) -> (Self, JoinHandle<()>) {
        let capacity = config.mailbox_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let count = Arc::new(AtomicUsize::new(0));

        let coordinator = Coordinator {
            clients: HashMap::new(),
            count: count.clone(),
        };
        let task = tokio::spawn(coordinator.run(register_rx, unregister_rx, broadcast_rx, shutdown));

        let hub = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            count,
            client_buffer: config.client_buffer.max(1),
        };
        (hub, task)
    }

    /// Installs a new stream for `recipient_id`, superseding any existing one.
    ///
    /// Returns once the coordinator has installed it, so any broadcast issued
    /// afterwards is routed to the new stream.
    pub async fn register(&self, recipient_id: i64) -> Result<Subscription, HubClosed> {
        let (sink, frames) = mpsc::channel(self.client_buffer);
        let (done_tx, done) = oneshot::channel();
        let (ack, acked) = oneshot::channel();
        let session_id = Uuid::new_v4();

        self.register_tx
            .send(Register {
                recipient_id,
                entry: ClientEntry {
                    session_id,
                    sink,
                    done: done_tx,
                },
                ack,
            })
            .await
            .map_err(|_| HubClosed)?;
        acked.await.map_err(|_| HubClosed)?;

        Ok(Subscription {
            recipient_id,
            session_id,
            frames,
            done,
        })
    }

    /// Removes the stream if it is still the current one for the recipient.
    /// Unregistering twice, or after supersession, is a no-op.
    pub async fn unregister(&self, recipient_id: i64, session_id: Uuid) {
        let _ = self
            .unregister_tx
            .send(Unregister {
                recipient_id,
                session_id,
            })
            .await;
    }

    /// Non-waiting [`unregister`](Self::unregister). Returns false when the
    /// mailbox is full or closed.
    pub fn try_unregister(&self, recipient_id: i64, session_id: Uuid) -> bool {
        self.unregister_tx
            .try_send(Unregister {
                recipient_id,
                session_id,
            })
            .is_ok()
    }

    /// Queues `notification` for the recipient's live stream, if any.
    pub async fn push(&self, recipient_id: i64, notification: Notification) -> Result<(), HubClosed> {
        self.broadcast_tx
            .send(Broadcast {
                recipient_id,
                notification,
            })
            .await
            .map_err(|_| HubClosed)
    }

    /// Number of registered streams as of the last coordinator step.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

struct Coordinator {
    clients: HashMap<i64, ClientEntry>,
    count: Arc<AtomicUsize>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<Register>,
        mut unregister_rx: mpsc::Receiver<Unregister>,
        mut broadcast_rx: mpsc::Receiver<Broadcast>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::debug!("stream hub started");
        let mut shutdown_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        shutdown_open = false;
                    }
                    continue;
                }
                Some(msg) = register_rx.recv() => self.register(msg),
                Some(msg) = unregister_rx.recv() => self.unregister(msg),
                Some(msg) = broadcast_rx.recv() => self.broadcast(msg),
                else => break,
            }

            self.count.store(self.clients.len(), Ordering::Release);
        }

        let open = self.clients.len();
        for (_, entry) in self.clients.drain() {
            entry.finish(DoneReason::ServerShutdown);
        }
        self.count.store(0, Ordering::Release);
        tracing::info!(closed_streams = open, "stream hub stopped");
    }

    fn register(&mut self, msg: Register) {
        let Register {
            recipient_id,
            entry,
            ack,
        } = msg;

        if let Some(previous) = self.clients.remove(&recipient_id) {
            tracing::info!(
                recipient_id,
                old_session = %previous.session_id,
                new_session = %entry.session_id,
                "stream superseded"
            );
            previous.finish(DoneReason::Superseded);
        }

        tracing::debug!(recipient_id, session_id = %entry.session_id, "stream registered");
        self.clients.insert(recipient_id, entry);
        self.count.store(self.clients.len(), Ordering::Release);
        let _ = ack.send(());
    }

    fn unregister(&mut self, msg: Unregister) {
        let is_current = self
            .clients
            .get(&msg.recipient_id)
            .is_some_and(|entry| entry.session_id == msg.session_id);
        if !is_current {
            return;
        }
        if let Some(entry) = self.clients.remove(&msg.recipient_id) {
            tracing::debug!(recipient_id = msg.recipient_id, session_id = %msg.session_id, "stream unregistered");
            entry.finish(DoneReason::Unregistered);
        }
    }

    fn broadcast(&mut self, msg: Broadcast) {
        let Broadcast {
            recipient_id,
            notification,
        } = msg;

        let Some(entry) = self.clients.get(&recipient_id) else {
            tracing::debug!(recipient_id, notification_id = %notification.id, "no live stream, push dropped");
            return;
        };

        let reason = match entry.sink.try_send(notification) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(
                    recipient_id,
                    session_id = %entry.session_id,
                    notification_id = %n.id,
                    "stream lagging, disconnecting"
                );
                DoneReason::Lagging
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                tracing::debug!(
                    recipient_id,
                    session_id = %entry.session_id,
                    notification_id = %n.id,
                    "stream sink closed, removing"
                );
                DoneReason::SinkClosed
            }
        };

        if let Some(entry) = self.clients.remove(&recipient_id) {
            entry.finish(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qahub_types::{NotificationKind, NotificationStatus};
    use std::time::Duration;

    fn notification(recipient_id: i64, content: &str) -> Notification {
        Notification {
            id: Uuid::new_v4().to_string(),
            recipient_id,
            sender_id: 3,
            sender_name: "alice".into(),
            kind: NotificationKind::NewAnswer,
            content: content.into(),
            target_url: "/questions/10#answer-1".into(),
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
        }
    }

    fn hub(client_buffer: usize) -> (StreamHub, watch::Sender<bool>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let (hub, task) = StreamHub::spawn(
            HubConfig {
                client_buffer,
                mailbox_capacity: 16,
            },
            rx,
        );
        (hub, tx, task)
    }

    async fn settle(hub: &StreamHub, expected: usize) {
        for _ in 0..100 {
            if hub.count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(hub.count(), expected);
    }

    #[tokio::test]
    async fn push_reaches_registered_stream() {
        let (hub, _tx, _task) = hub(4);
        let mut sub = hub.register(5).await.unwrap();
        assert_eq!(hub.count(), 1);

        hub.push(5, notification(5, "hello")).await.unwrap();
        let frame = sub.frames.recv().await.unwrap();
        assert_eq!(frame.content, "hello");
    }

    #[tokio::test]
    async fn push_without_stream_is_dropped() {
        let (hub, _tx, _task) = hub(4);
        hub.push(9, notification(9, "nobody")).await.unwrap();
        let mut sub = hub.register(9).await.unwrap();
        assert!(sub.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_registration_supersedes_first() {
        let (hub, _tx, _task) = hub(4);
        let first = hub.register(5).await.unwrap();
        let mut second = hub.register(5).await.unwrap();

        assert_eq!(first.done.await.unwrap(), DoneReason::Superseded);
        assert_eq!(hub.count(), 1);

        hub.push(5, notification(5, "after")).await.unwrap();
        assert_eq!(second.frames.recv().await.unwrap().content, "after");
    }

    #[tokio::test]
    async fn stale_unregister_does_not_remove_successor() {
        let (hub, _tx, _task) = hub(4);
        let first = hub.register(5).await.unwrap();
        let mut second = hub.register(5).await.unwrap();

        hub.unregister(5, first.session_id).await;
        hub.unregister(5, first.session_id).await;
        hub.push(5, notification(5, "still here")).await.unwrap();
        assert_eq!(second.frames.recv().await.unwrap().content, "still here");
        assert_eq!(hub.count(), 1);

        hub.unregister(5, second.session_id).await;
        settle(&hub, 0).await;
        assert_eq!(second.done.await.unwrap(), DoneReason::Unregistered);
    }

    #[tokio::test]
    async fn full_buffer_disconnects_lagging_stream() {
        let (hub, _tx, _task) = hub(2);
        let mut sub = hub.register(5).await.unwrap();

        for i in 0..3 {
            hub.push(5, notification(5, &format!("n{i}"))).await.unwrap();
        }

        assert_eq!((&mut sub.done).await.unwrap(), DoneReason::Lagging);
        settle(&hub, 0).await;
        // The buffered frames are still readable, then the sink is closed.
        assert!(sub.frames.recv().await.is_some());
        assert!(sub.frames.recv().await.is_some());
        assert!(sub.frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_is_cleaned_up_on_next_push() {
        let (hub, _tx, _task) = hub(2);
        let sub = hub.register(5).await.unwrap();
        drop(sub);

        hub.push(5, notification(5, "x")).await.unwrap();
        settle(&hub, 0).await;
    }

    #[tokio::test]
    async fn shutdown_ends_every_stream() {
        let (hub, tx, task) = hub(2);
        let a = hub.register(1).await.unwrap();
        let b = hub.register(2).await.unwrap();

        tx.send(true).unwrap();
        assert_eq!(a.done.await.unwrap(), DoneReason::ServerShutdown);
        assert_eq!(b.done.await.unwrap(), DoneReason::ServerShutdown);
        task.await.unwrap();
        assert_eq!(hub.count(), 0);
        assert!(hub.register(3).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_registrations_keep_one_entry_per_recipient() {
        let (hub, _tx, _task) = hub(4);
        let mut handles = Vec::new();
        for i in 0..50 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move { hub.register(i % 5).await.unwrap() }));
        }
        let mut subs = Vec::new();
        for h in handles {
            subs.push(h.await.unwrap());
        }
        assert_eq!(hub.count(), 5);

        let superseded = subs
            .iter_mut()
            .map(|s| s.done.try_recv())
            .filter(|r| matches!(r, Ok(DoneReason::Superseded)))
            .count();
        assert_eq!(superseded, 45);
    }
}
