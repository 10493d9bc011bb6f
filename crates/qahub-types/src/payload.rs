//! Event payload bodies carried under the `payload` key of an envelope.

use serde::{Deserialize, Serialize};

use crate::NotificationKind;

/// Payload of a `notification.triggered` event.
///
/// Producers never emit one where `recipient_id == sender_id`; consumers
/// still treat such a payload as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTriggeredPayload {
    pub recipient_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub notification_kind: NotificationKind,
    pub content: String,
    pub target_url: String,
}

impl NotificationTriggeredPayload {
    /// True when the actor and the recipient are the same principal.
    pub fn is_self_triggered(&self) -> bool {
        self.recipient_id == self.sender_id
    }
}

/// Payload of the `question.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub author_id: i64,
    pub author_name: String,
}

/// Payload of the `answer.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub id: i64,
    pub question_id: i64,
    pub content: String,
    pub author_id: i64,
    pub author_name: String,
}

/// Payload of the `comment.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPayload {
    pub id: i64,
    pub answer_id: i64,
    pub content: String,
    pub author_id: i64,
    pub author_name: String,
}
