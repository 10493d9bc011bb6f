//! Timestamp conventions shared by storage, the wire, and display.
//!
//! - Storage: RFC 3339 UTC with a fixed six-digit fraction, so that string
//!   order equals chronological order inside SQLite.
//! - Wire: `{seconds, nanos}` pairs.
//! - Display: `YYYY-MM-DD HH:MM:SS` in the local time zone.

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch according to the wall clock.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Formats an instant for storage.
pub fn to_storage(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an instant previously written by [`to_storage`].
pub fn from_storage(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Renders an instant for humans, in the local time zone.
pub fn render_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// A protobuf-style timestamp: whole seconds plus nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        Self {
            seconds: ts.timestamp(),
            nanos: ts.timestamp_subsec_nanos() as i32,
        }
    }
}

impl WireTimestamp {
    /// Converts back to an instant. Returns `None` when out of range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanos.max(0) as u32)
            .single()
    }
}
