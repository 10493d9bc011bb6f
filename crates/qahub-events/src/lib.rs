//! Event envelope, durable topic log, producer and consumer.
//!
//! Events travel as UTF-8 JSON `{header, payload}` records. Producers append
//! them to a named topic under an ordering key; consumers read a topic as a
//! named group, route each record on `header.type`, and commit their
//! position after every record.

mod consumer;
mod envelope;
mod error;
pub mod log;
mod producer;

pub use consumer::{
    ConsumeContext, Consumer, EventHandler, PollOutcome, DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL,
};
pub use envelope::{Envelope, EventHeader};
pub use error::{EventError, HandlerError};
pub use producer::{publish, LogProducer, Producer};
