//! Shared types, event vocabulary, and constants for the QAHub services.
//!
//! Every crate in the workspace that needs to agree on a wire-level name
//! (event types, topic names, notification kinds) takes it from here, so a
//! producer in one service and a consumer in another can never drift apart.
//!
//! This crate has no internal dependencies.

use serde::{Deserialize, Serialize};

mod payload;
pub mod time;

pub use payload::{AnswerPayload, CommentPayload, NotificationTriggeredPayload, QuestionPayload};

/// Topic carrying content lifecycle events (questions, answers, comments).
pub const TOPIC_QA_EVENTS: &str = "qa_events";

/// Topic carrying notification delivery triggers.
pub const TOPIC_NOTIFICATION_EVENTS: &str = "notification_events";

/// Consumer group of the notification service.
pub const GROUP_NOTIFICATION_CONSUMER: &str = "notification-consumer";

/// Consumer group of the search indexer.
pub const GROUP_SEARCH_CONSUMER: &str = "search-consumer";

/// Service name stamped into the `source` header of events emitted by the
/// Q&A content service.
pub const SOURCE_QA_SERVICE: &str = "qa-service";

/// Domain event types carried in the `type` field of an event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "question.created")]
    QuestionCreated,
    #[serde(rename = "question.updated")]
    QuestionUpdated,
    #[serde(rename = "question.deleted")]
    QuestionDeleted,
    #[serde(rename = "answer.created")]
    AnswerCreated,
    #[serde(rename = "answer.updated")]
    AnswerUpdated,
    #[serde(rename = "answer.deleted")]
    AnswerDeleted,
    #[serde(rename = "comment.created")]
    CommentCreated,
    #[serde(rename = "comment.updated")]
    CommentUpdated,
    #[serde(rename = "comment.deleted")]
    CommentDeleted,
    #[serde(rename = "notification.triggered")]
    NotificationTriggered,
}

impl EventType {
    /// All known event types, in declaration order.
    pub const ALL: [EventType; 10] = [
        Self::QuestionCreated,
        Self::QuestionUpdated,
        Self::QuestionDeleted,
        Self::AnswerCreated,
        Self::AnswerUpdated,
        Self::AnswerDeleted,
        Self::CommentCreated,
        Self::CommentUpdated,
        Self::CommentDeleted,
        Self::NotificationTriggered,
    ];

    /// Returns the canonical wire name of this event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuestionCreated => "question.created",
            Self::QuestionUpdated => "question.updated",
            Self::QuestionDeleted => "question.deleted",
            Self::AnswerCreated => "answer.created",
            Self::AnswerUpdated => "answer.updated",
            Self::AnswerDeleted => "answer.deleted",
            Self::CommentCreated => "comment.created",
            Self::CommentUpdated => "comment.updated",
            Self::CommentDeleted => "comment.deleted",
            Self::NotificationTriggered => "notification.triggered",
        }
    }

    /// Returns the topic this event type is published to.
    pub fn topic(self) -> &'static str {
        match self {
            Self::NotificationTriggered => TOPIC_NOTIFICATION_EVENTS,
            _ => TOPIC_QA_EVENTS,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("event type", s))
    }
}

/// What happened that produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Someone answered a question owned by the recipient.
    NewAnswer,
    /// Someone commented on an answer owned by the recipient.
    NewComment,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewAnswer => "new_answer",
            Self::NewComment => "new_comment",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_answer" => Ok(Self::NewAnswer),
            "new_comment" => Ok(Self::NewComment),
            _ => Err(ParseEnumError::new("notification kind", s)),
        }
    }
}

/// Read state of a stored notification.
///
/// The only legal transition is `Unread` to `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(Self::Unread),
            "read" => Ok(Self::Read),
            _ => Err(ParseEnumError::new("notification status", s)),
        }
    }
}

/// Error returned when a wire string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }

    /// The rejected input string.
    pub fn value(&self) -> &str {
        &self.value
    }
}
