use chrono::{SubsecRound, Utc};
use qahub_types::time::{from_storage, to_storage};
use qahub_types::NotificationStatus;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::{ListQuery, MarkTarget, NewNotification, Notification, NotificationPage, NotifyError};

const COLUMNS: &str = "notification_id, recipient_id, sender_id, sender_name, kind, content, \
                       target_url, status, created_at";

/// Inserts an unread notification with a fresh id.
pub fn create(conn: &Connection, new: &NewNotification) -> Result<Notification, NotifyError> {
    let notification = Notification {
        id: Uuid::new_v4().to_string(),
        recipient_id: new.recipient_id,
        sender_id: new.sender_id,
        sender_name: new.sender_name.clone(),
        kind: new.kind,
        content: new.content.clone(),
        target_url: new.target_url.clone(),
        status: NotificationStatus::Unread,
        // Storage keeps microseconds; truncate so the returned value matches a re-read.
        created_at: new.created_at.unwrap_or_else(Utc::now).trunc_subsecs(6),
    };

    conn.execute(
        "INSERT INTO notifications
            (notification_id, recipient_id, sender_id, sender_name, kind, content, target_url, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            notification.id,
            notification.recipient_id,
            notification.sender_id,
            notification.sender_name,
            notification.kind.as_str(),
            notification.content,
            notification.target_url,
            notification.status.as_str(),
            to_storage(notification.created_at),
        ],
    )?;

    Ok(notification)
}

/// Like [`create`], but records `(group, event_id)` in the same transaction
/// and returns `None` without inserting when that pair was seen before.
pub fn create_for_event(
    conn: &Connection,
    new: &NewNotification,
    group: &str,
    event_id: &str,
) -> Result<Option<Notification>, NotifyError> {
    let tx = conn.unchecked_transaction()?;

    let first_seen = tx.execute(
        "INSERT OR IGNORE INTO processed_events (group_name, event_id) VALUES (?1, ?2)",
        params![group, event_id],
    )? == 1;

    if !first_seen {
        tracing::debug!(group, event_id, "event already processed, suppressing");
        return Ok(None);
    }

    let notification = create(&tx, new)?;
    tx.commit()?;
    Ok(Some(notification))
}

pub fn get(conn: &Connection, recipient_id: i64, id: &str) -> Result<Notification, NotifyError> {
    check_id(id)?;
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM notifications WHERE notification_id = ?1 AND recipient_id = ?2"
        ),
        params![id, recipient_id],
        row_to_notification,
    )
    .optional()?
    .ok_or_else(|| NotifyError::NotFound(id.to_string()))
}

/// Newest-first page of a recipient's notifications.
pub fn list_for(
    conn: &Connection,
    recipient_id: i64,
    query: &ListQuery,
) -> Result<NotificationPage, NotifyError> {
    let status_filter = if query.unread_only {
        " AND status = 'unread'"
    } else {
        ""
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1{status_filter}"),
        params![recipient_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM notifications
         WHERE recipient_id = ?1{status_filter}
         ORDER BY created_at DESC, seq DESC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let items = stmt
        .query_map(
            params![
                recipient_id,
                i64::from(query.page.page_size()),
                query.page.offset()
            ],
            row_to_notification,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NotificationPage {
        items,
        total,
        unread_count: count_unread(conn, recipient_id)?,
        page: query.page.page(),
        page_size: query.page.page_size(),
    })
}

pub fn count_unread(conn: &Connection, recipient_id: i64) -> Result<i64, NotifyError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND status = 'unread'",
        params![recipient_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Moves the targeted unread notifications of `recipient_id` to read and
/// returns how many changed. Ids that are unknown, foreign or already read
/// are ignored.
pub fn mark_read_many(
    conn: &Connection,
    recipient_id: i64,
    target: &MarkTarget,
) -> Result<usize, NotifyError> {
    let updated = match target {
        MarkTarget::All => conn.execute(
            "UPDATE notifications SET status = 'read'
             WHERE recipient_id = ?1 AND status = 'unread'",
            params![recipient_id],
        )?,
        MarkTarget::Ids(ids) => {
            if ids.is_empty() {
                return Ok(0);
            }
            for id in ids {
                check_id(id)?;
            }

            let tx = conn.unchecked_transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE notifications SET status = 'read'
                     WHERE notification_id = ?1 AND recipient_id = ?2 AND status = 'unread'",
                )?;
                for id in ids {
                    updated += stmt.execute(params![id, recipient_id])?;
                }
            }
            tx.commit()?;
            updated
        }
    };

    tracing::debug!(recipient_id, updated, "notifications marked read");
    Ok(updated)
}

pub fn delete_one(conn: &Connection, recipient_id: i64, id: &str) -> Result<(), NotifyError> {
    check_id(id)?;
    let deleted = conn.execute(
        "DELETE FROM notifications WHERE notification_id = ?1 AND recipient_id = ?2",
        params![id, recipient_id],
    )?;
    if deleted == 0 {
        return Err(NotifyError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Deletes the listed notifications of `recipient_id`, returning how many
/// existed.
pub fn delete_many(
    conn: &Connection,
    recipient_id: i64,
    ids: &[String],
) -> Result<usize, NotifyError> {
    for id in ids {
        check_id(id)?;
    }

    let tx = conn.unchecked_transaction()?;
    let mut deleted = 0;
    {
        let mut stmt = tx.prepare(
            "DELETE FROM notifications WHERE notification_id = ?1 AND recipient_id = ?2",
        )?;
        for id in ids {
            deleted += stmt.execute(params![id, recipient_id])?;
        }
    }
    tx.commit()?;
    Ok(deleted)
}

fn check_id(id: &str) -> Result<(), NotifyError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| NotifyError::InvalidId(id.to_string()))
}

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(4)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        kind: kind.parse().map_err(|e| conversion_error(4, e))?,
        content: row.get(5)?,
        target_url: row.get(6)?,
        status: status.parse().map_err(|e| conversion_error(7, e))?,
        created_at: from_storage(&created_at).map_err(|e| conversion_error(8, e))?,
    })
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}
