use futures_util::future::BoxFuture;
use qahub_db::DbPool;
use serde::Serialize;

use crate::envelope::Envelope;
use crate::{log, EventError};

/// Writes records to a topic.
///
/// `send` resolves only once the record is durable and returns its offset.
/// Implementations must be safe to share between tasks.
pub trait Producer: Send + Sync {
    fn send<'a>(
        &'a self,
        topic: &'a str,
        key: String,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<i64, EventError>>;
}

/// Serializes `envelope` and sends it on `topic` under `key`.
pub async fn publish<P: Serialize>(
    producer: &dyn Producer,
    topic: &str,
    key: impl Into<String>,
    envelope: &Envelope<P>,
) -> Result<i64, EventError> {
    let value = envelope.to_bytes()?;
    let key = key.into();
    let offset = producer.send(topic, key.clone(), value).await?;
    tracing::debug!(
        topic,
        key = %key,
        offset,
        event_id = %envelope.header.event_id,
        event_type = %envelope.header.event_type,
        "event published"
    );
    Ok(offset)
}

/// Producer that appends to the SQLite topic log.
#[derive(Clone)]
pub struct LogProducer {
    pool: DbPool,
}

impl LogProducer {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl Producer for LogProducer {
    fn send<'a>(
        &'a self,
        topic: &'a str,
        key: String,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<i64, EventError>> {
        let pool = self.pool.clone();
        let topic = topic.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                log::append(&conn, &topic, &key, &value)
            })
            .await?
        })
    }
}
