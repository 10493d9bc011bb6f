//! SQLite-backed topic log.
//!
//! Every topic shares the `event_log` table; the global `offset` orders
//! records, so one topic's records are totally ordered and per-key order
//! follows. Consumer groups track their position in `consumer_offsets`.

use rusqlite::{params, Connection, OptionalExtension};

use crate::EventError;

/// One record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: i64,
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub appended_at: String,
}

/// Appends a record and returns its offset.
pub fn append(conn: &Connection, topic: &str, key: &str, payload: &[u8]) -> Result<i64, EventError> {
    let offset = conn.query_row(
        "INSERT INTO event_log (topic, record_key, payload) VALUES (?1, ?2, ?3)
         RETURNING \"offset\"",
        params![topic, key, payload],
        |row| row.get(0),
    )?;
    Ok(offset)
}

/// Reads up to `limit` records of `topic` with offset greater than `after`.
pub fn read_after(
    conn: &Connection,
    topic: &str,
    after: i64,
    limit: usize,
) -> Result<Vec<LogRecord>, EventError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(
        "SELECT \"offset\", topic, record_key, payload, appended_at
         FROM event_log
         WHERE topic = ?1 AND \"offset\" > ?2
         ORDER BY \"offset\" ASC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![topic, after, limit], |row| {
        Ok(LogRecord {
            offset: row.get(0)?,
            topic: row.get(1)?,
            key: row.get(2)?,
            payload: row.get(3)?,
            appended_at: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// The last offset `group` committed on `topic`, or 0 when it never has.
pub fn committed_offset(conn: &Connection, topic: &str, group: &str) -> Result<i64, EventError> {
    let offset = conn
        .query_row(
            "SELECT committed_offset FROM consumer_offsets WHERE topic = ?1 AND group_name = ?2",
            params![topic, group],
            |row| row.get(0),
        )
        .optional()?;
    Ok(offset.unwrap_or(0))
}

/// Records `offset` as processed for `group`. Never moves a group backwards.
pub fn commit_offset(
    conn: &Connection,
    topic: &str,
    group: &str,
    offset: i64,
) -> Result<(), EventError> {
    conn.execute(
        "INSERT INTO consumer_offsets (topic, group_name, committed_offset)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(topic, group_name) DO UPDATE SET
             committed_offset = MAX(consumer_offsets.committed_offset, excluded.committed_offset),
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        params![topic, group, offset],
    )?;
    Ok(())
}

/// Highest offset written to `topic`, or 0 for an empty topic.
pub fn latest_offset(conn: &Connection, topic: &str) -> Result<i64, EventError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(\"offset\") FROM event_log WHERE topic = ?1",
        params![topic],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0))
}
