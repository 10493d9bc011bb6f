//! Event emission for content writes.
//!
//! The content service calls these hooks after an answer or comment has been
//! committed. Publishing runs in a detached task that owns a snapshot of the
//! actor's identity, so it never depends on the request that triggered it
//! and a publish failure never fails that request. Failures are logged.

use std::sync::Arc;

use qahub_auth::Identity;
use qahub_events::{publish, Envelope, Producer};
use qahub_types::{
    AnswerPayload, CommentPayload, EventType, NotificationKind, NotificationTriggeredPayload,
    SOURCE_QA_SERVICE, TOPIC_NOTIFICATION_EVENTS, TOPIC_QA_EVENTS,
};
use tokio::task::JoinHandle;

/// The question an answer was posted to.
#[derive(Debug, Clone)]
pub struct QuestionRef {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
}

/// The answer a comment was posted to.
#[derive(Debug, Clone)]
pub struct AnswerRef {
    pub id: i64,
    pub question_id: i64,
    pub owner_id: i64,
}

#[derive(Clone)]
pub struct Originator {
    producer: Arc<dyn Producer>,
}

impl Originator {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }

    /// Publishes `answer.created` and, unless the actor owns the question,
    /// a `new_answer` notification for the question owner.
    pub fn answer_created(
        &self,
        actor: &Identity,
        question: QuestionRef,
        answer: AnswerPayload,
    ) -> JoinHandle<()> {
        let producer = self.producer.clone();
        let actor = actor.clone();

        tokio::spawn(async move {
            let content_key = answer.id.to_string();
            let notification = (question.owner_id != actor.principal_id).then(|| {
                NotificationTriggeredPayload {
                    recipient_id: question.owner_id,
                    sender_id: actor.principal_id,
                    sender_name: actor.username.clone(),
                    notification_kind: NotificationKind::NewAnswer,
                    content: format!(
                        "'{}' answered your question: '{}', content is '{}'",
                        actor.username, question.title, answer.content
                    ),
                    target_url: format!("/questions/{}#answer-{}", question.id, answer.id),
                }
            });

            let lifecycle = Envelope::new(EventType::AnswerCreated, SOURCE_QA_SERVICE, answer);
            emit(producer.as_ref(), TOPIC_QA_EVENTS, content_key, &lifecycle).await;

            if let Some(payload) = notification {
                trigger(producer.as_ref(), payload).await;
            }
        })
    }

    /// Publishes `comment.created` and, unless the actor owns the answer,
    /// a `new_comment` notification for the answer owner.
    pub fn comment_created(
        &self,
        actor: &Identity,
        answer: AnswerRef,
        comment: CommentPayload,
    ) -> JoinHandle<()> {
        let producer = self.producer.clone();
        let actor = actor.clone();

        tokio::spawn(async move {
            let content_key = comment.id.to_string();
            let notification = (answer.owner_id != actor.principal_id).then(|| {
                NotificationTriggeredPayload {
                    recipient_id: answer.owner_id,
                    sender_id: actor.principal_id,
                    sender_name: actor.username.clone(),
                    notification_kind: NotificationKind::NewComment,
                    content: format!(
                        "'{}' commented on your answer: '{}'",
                        actor.username, comment.content
                    ),
                    target_url: format!("/questions/{}#comment-{}", answer.question_id, comment.id),
                }
            });

            let lifecycle = Envelope::new(EventType::CommentCreated, SOURCE_QA_SERVICE, comment);
            emit(producer.as_ref(), TOPIC_QA_EVENTS, content_key, &lifecycle).await;

            if let Some(payload) = notification {
                trigger(producer.as_ref(), payload).await;
            }
        })
    }
}

/// Publishes a `notification.triggered` event keyed by its recipient.
pub async fn trigger(producer: &dyn Producer, payload: NotificationTriggeredPayload) {
    let key = payload.recipient_id.to_string();
    let envelope = Envelope::new(EventType::NotificationTriggered, SOURCE_QA_SERVICE, payload);
    emit(producer, TOPIC_NOTIFICATION_EVENTS, key, &envelope).await;
}

async fn emit<P: serde::Serialize>(
    producer: &dyn Producer,
    topic: &str,
    key: String,
    envelope: &Envelope<P>,
) {
    if let Err(e) = publish(producer, topic, key.clone(), envelope).await {
        tracing::error!(
            topic,
            key = %key,
            event_id = %envelope.header.event_id,
            event_type = %envelope.header.event_type,
            "event publish failed: {}",
            e
        );
    }
}
