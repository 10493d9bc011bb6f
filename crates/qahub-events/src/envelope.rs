//! The `{header, payload}` record written to every topic.

use chrono::{DateTime, Utc};
use qahub_types::EventType;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl EventHeader {
    /// A header with a fresh event id stamped now.
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub header: EventHeader,
    pub payload: P,
}

impl<P> Envelope<P> {
    pub fn new(event_type: EventType, source: impl Into<String>, payload: P) -> Self {
        Self {
            header: EventHeader::new(event_type, source),
            payload,
        }
    }
}

impl<P: Serialize> Envelope<P> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Header fields as read off the wire, before the type is recognised.
#[derive(Debug, Deserialize)]
pub(crate) struct RawHeader {
    pub event_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
}

/// A record split into its header and an undecoded payload.
#[derive(Debug, Deserialize)]
pub(crate) struct RawEnvelope<'a> {
    pub header: RawHeader,
    #[serde(borrow)]
    pub payload: Option<&'a RawValue>,
}

impl<'a> RawEnvelope<'a> {
    pub fn decode(bytes: &'a [u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn payload_bytes(&self) -> &'a [u8] {
        self.payload.map(|raw| raw.get().as_bytes()).unwrap_or(b"null")
    }
}
