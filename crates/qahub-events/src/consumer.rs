//! Consumer-group reader loop.
//!
//! A [`Consumer`] is bound to one topic and one group. It reads records past
//! the group's committed offset, routes each by `header.type` to the handler
//! registered for that type, and commits the offset after every record
//! whatever the handler returned. Delivery is therefore at-least-once:
//! a crash between a handler's side effect and the commit replays the record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use qahub_db::DbPool;
use qahub_types::EventType;
use tokio::sync::watch;
use uuid::Uuid;

use crate::envelope::RawEnvelope;
use crate::log::{self, LogRecord};
use crate::{EventError, HandlerError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Where the record being handled came from.
#[derive(Debug, Clone)]
pub struct ConsumeContext {
    pub topic: String,
    pub group: String,
    pub offset: i64,
    pub key: String,
    pub event_id: Option<Uuid>,
    pub source: String,
}

/// Handles the payload of one event type.
pub trait EventHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        ctx: &'a ConsumeContext,
        event_type: EventType,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Tally of one [`Consumer::poll_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Records read and committed.
    pub consumed: usize,
    /// Records a handler accepted.
    pub handled: usize,
    /// Records with an unknown or unrouted type, or an undecodable header.
    pub skipped: usize,
    /// Records whose handler returned an error.
    pub failed: usize,
}

pub struct Consumer {
    pool: DbPool,
    topic: String,
    group: String,
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    poll_interval: Duration,
    batch_size: usize,
}

impl Consumer {
    pub fn new(pool: DbPool, topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            pool,
            topic: topic.into(),
            group: group.into(),
            handlers: HashMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_handler(mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Runs until `shutdown` turns true, sleeping `poll_interval` whenever
    /// the topic has nothing new. If the sender is dropped the consumer
    /// keeps running at the same pace.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            handlers = self.handlers.len(),
            "event consumer started"
        );

        let mut shutdown_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(outcome) => outcome.consumed == 0,
                Err(e) => {
                    tracing::error!(topic = %self.topic, group = %self.group, "event poll failed: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed(), if shutdown_open => {
                        // A dropped sender can never signal; keep polling on the interval.
                        if changed.is_err() {
                            shutdown_open = false;
                        }
                    }
                }
            }
        }

        tracing::info!(topic = %self.topic, group = %self.group, "event consumer stopped");
    }

    /// Reads one batch past the committed offset and dispatches it.
    pub async fn poll_once(&self) -> Result<PollOutcome, EventError> {
        let pool = self.pool.clone();
        let topic = self.topic.clone();
        let group = self.group.clone();
        let limit = self.batch_size;
        let batch = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let after = log::committed_offset(&conn, &topic, &group)?;
            log::read_after(&conn, &topic, after, limit)
        })
        .await??;

        let mut outcome = PollOutcome::default();
        for record in batch {
            match self.dispatch(&record).await {
                Dispatch::Handled => outcome.handled += 1,
                Dispatch::Skipped => outcome.skipped += 1,
                Dispatch::Failed => outcome.failed += 1,
            }
            self.commit(record.offset).await?;
            outcome.consumed += 1;
        }
        Ok(outcome)
    }

    async fn dispatch(&self, record: &LogRecord) -> Dispatch {
        let raw = match RawEnvelope::decode(&record.payload) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    topic = %record.topic,
                    offset = record.offset,
                    "skipping record with undecodable header: {}",
                    e
                );
                return Dispatch::Skipped;
            }
        };

        let Ok(event_type) = raw.header.event_type.parse::<EventType>() else {
            tracing::warn!(
                topic = %record.topic,
                offset = record.offset,
                event_type = %raw.header.event_type,
                "skipping unknown event type"
            );
            return Dispatch::Skipped;
        };

        let Some(handler) = self.handlers.get(&event_type) else {
            tracing::debug!(
                topic = %record.topic,
                offset = record.offset,
                %event_type,
                "no handler registered, skipping"
            );
            return Dispatch::Skipped;
        };

        let ctx = ConsumeContext {
            topic: record.topic.clone(),
            group: self.group.clone(),
            offset: record.offset,
            key: record.key.clone(),
            event_id: raw.header.event_id,
            source: raw.header.source.clone(),
        };

        match handler.handle(&ctx, event_type, raw.payload_bytes()).await {
            Ok(()) => Dispatch::Handled,
            Err(e) => {
                tracing::error!(
                    topic = %ctx.topic,
                    offset = ctx.offset,
                    event_id = ?ctx.event_id,
                    %event_type,
                    "event handler failed: {}",
                    e
                );
                Dispatch::Failed
            }
        }
    }

    async fn commit(&self, offset: i64) -> Result<(), EventError> {
        let pool = self.pool.clone();
        let topic = self.topic.clone();
        let group = self.group.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            log::commit_offset(&conn, &topic, &group, offset)
        })
        .await?
    }
}

enum Dispatch {
    Handled,
    Skipped,
    Failed,
}
