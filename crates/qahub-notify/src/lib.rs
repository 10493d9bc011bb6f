//! Per-recipient notification storage.
//!
//! Every read and mutation is scoped by `recipient_id` in addition to the
//! notification id, so a principal can never see or touch another
//! principal's rows, even with a guessed id. Status only moves from
//! `unread` to `read`.

use chrono::{DateTime, Utc};
use qahub_types::{NotificationKind, NotificationStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod store;

pub use store::{
    count_unread, create, create_for_event, delete_many, delete_one, get, list_for,
    mark_read_many,
};

/// Page size used when a request does not name one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Largest page a single request may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Also returned for ids that exist but belong to someone else.
    #[error("notification not found: {0}")]
    NotFound(String),

    #[error("invalid notification id: {0}")]
    InvalidId(String),
}

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Server-assigned UUID.
    pub id: String,
    pub recipient_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub kind: NotificationKind,
    pub content: String,
    /// In-app link to the entity the notification is about.
    pub target_url: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the caller when inserting a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub kind: NotificationKind,
    pub content: String,
    pub target_url: String,
    /// Defaults to the insertion instant.
    pub created_at: Option<DateTime<Utc>>,
}

/// A normalized page position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Normalizes raw request values: `page < 1` becomes 1, a
    /// `page_size` below 1 becomes [`DEFAULT_PAGE_SIZE`], and larger
    /// values are capped at [`MAX_PAGE_SIZE`].
    pub fn new(page: i64, page_size: i64) -> Self {
        let page = u32::try_from(page.max(1)).unwrap_or(u32::MAX);
        let page_size = if page_size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(i64::from(MAX_PAGE_SIZE)) as u32
        };
        Self { page, page_size }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: PageRequest,
    pub unread_only: bool,
}

/// One page of a recipient's notifications, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    /// Rows matching the query across all pages.
    pub total: i64,
    /// Unread rows of the recipient, regardless of the query filter.
    pub unread_count: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Which notifications a mark-read call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkTarget {
    Ids(Vec<String>),
    All,
}
