mod common;

use axum::http::StatusCode;
use qahub_events::{publish, Envelope, LogProducer};
use qahub_server::config::Idempotency;
use qahub_server::originator::{self, AnswerRef, QuestionRef};
use qahub_types::{
    AnswerPayload, CommentPayload, EventType, NotificationKind, NotificationTriggeredPayload,
    TOPIC_NOTIFICATION_EVENTS,
};
use serde_json::{json, Value};

const LIST: &str = "notification.NotificationService/GetNotifications";
const UNREAD: &str = "notification.NotificationService/GetUnreadCount";
const MARK: &str = "notification.NotificationService/MarkAsRead";

fn answer(id: i64, question_id: i64, author_id: i64) -> AnswerPayload {
    AnswerPayload {
        id,
        question_id,
        content: format!("answer body {id}"),
        author_id,
        author_name: "alice".into(),
    }
}

fn triggered(recipient_id: i64, sender_id: i64, content: &str) -> NotificationTriggeredPayload {
    NotificationTriggeredPayload {
        recipient_id,
        sender_id,
        sender_name: "alice".into(),
        notification_kind: NotificationKind::NewAnswer,
        content: content.into(),
        target_url: "/questions/10#answer-1".into(),
    }
}

async fn list(server: &common::TestServer, token: &str, body: Value) -> Value {
    let (status, body) = server.rpc(LIST, Some(token), body).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

async fn unread(server: &common::TestServer, token: &str) -> i64 {
    let (status, body) = server.rpc(UNREAD, Some(token), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["unread_count"].as_i64().unwrap()
}

#[tokio::test]
async fn self_action_produces_no_notification() {
    let server = common::setup().await;
    let (owner_id, owner_token) = server.signup("owner").await;
    let owner = server.state.tokens.parse(&owner_token).unwrap();

    let before = list(&server, &owner_token, json!({})).await;

    server
        .originator()
        .answer_created(
            &owner,
            QuestionRef {
                id: 42,
                title: "Own question".into(),
                owner_id,
            },
            answer(1, 42, owner_id),
        )
        .await
        .unwrap();

    // Even a self-triggered event that reaches the topic is dropped.
    let producer = LogProducer::new(server.pool.clone());
    originator::trigger(&producer, triggered(owner_id, owner_id, "self")).await;

    let outcome = server.consumer().poll_once().await.unwrap();
    assert_eq!(outcome.consumed, 1);
    assert_eq!(outcome.failed, 0);

    let after = list(&server, &owner_token, json!({})).await;
    assert_eq!(before, after);
    assert_eq!(after["total"], 0);
}

#[tokio::test]
async fn cross_user_answer_is_stored_for_question_owner() {
    let server = common::setup().await;
    let (alice_id, alice_token) = server.signup("alice").await;
    let (bob_id, bob_token) = server.signup("bob").await;
    let alice = server.state.tokens.parse(&alice_token).unwrap();

    server
        .originator()
        .answer_created(
            &alice,
            QuestionRef {
                id: 10,
                title: "Q10".into(),
                owner_id: bob_id,
            },
            answer(77, 10, alice_id),
        )
        .await
        .unwrap();

    let outcome = server.consumer().poll_once().await.unwrap();
    assert_eq!(outcome.handled, 1);

    {
        let conn = server.pool.get().unwrap();
        assert!(qahub_events::log::latest_offset(&conn, "qa_events").unwrap() > 0);
    }

    let body = list(
        &server,
        &bob_token,
        json!({"page": 1, "page_size": 10, "unread_only": true}),
    )
    .await;
    let items = body["notifications"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    let n = &items[0];
    assert_eq!(n["status"], "unread");
    assert_eq!(n["recipient_id"], bob_id);
    assert_eq!(n["sender_id"], alice_id);
    assert_eq!(n["sender_name"], "alice");
    assert_eq!(n["kind"], "new_answer");
    assert_eq!(
        n["content"],
        "'alice' answered your question: 'Q10', content is 'answer body 77'"
    );
    assert_eq!(n["target_url"], "/questions/10#answer-77");
    assert!(n["created_at"]["seconds"].as_i64().unwrap() > 0);
    assert_eq!(n["created_at_display"].as_str().unwrap().len(), 19);

    // The actor sees nothing.
    assert_eq!(list(&server, &alice_token, json!({})).await["total"], 0);
}

#[tokio::test]
async fn comment_notifies_answer_owner() {
    let server = common::setup().await;
    let (alice_id, alice_token) = server.signup("alice").await;
    let (bob_id, bob_token) = server.signup("bob").await;
    let bob = server.state.tokens.parse(&bob_token).unwrap();

    server
        .originator()
        .comment_created(
            &bob,
            AnswerRef {
                id: 5,
                question_id: 10,
                owner_id: alice_id,
            },
            CommentPayload {
                id: 9,
                answer_id: 5,
                content: "nice".into(),
                author_id: bob_id,
                author_name: "bob".into(),
            },
        )
        .await
        .unwrap();
    server.consumer().poll_once().await.unwrap();

    let body = list(&server, &alice_token, json!({})).await;
    let n = &body["notifications"][0];
    assert_eq!(n["kind"], "new_comment");
    assert_eq!(n["content"], "'bob' commented on your answer: 'nice'");
    assert_eq!(n["target_url"], "/questions/10#comment-9");
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let server = common::setup().await;
    let (_, _) = server.signup("alice").await;
    let (bob_id, bob_token) = server.signup("bob").await;

    let producer = LogProducer::new(server.pool.clone());
    for content in ["n1", "n2", "n3"] {
        originator::trigger(&producer, triggered(bob_id, 1, content)).await;
    }
    server.consumer().poll_once().await.unwrap();

    let body = list(&server, &bob_token, json!({})).await;
    let id_of = |content: &str| {
        body["notifications"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["content"] == content)
            .map(|n| n["id"].as_str().unwrap().to_string())
            .unwrap()
    };
    let (n1, n3) = (id_of("n1"), id_of("n3"));

    let (status, res) = server
        .rpc(MARK, Some(&bob_token), json!({"notification_ids": [n3]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["modified_count"], 1);
    assert_eq!(unread(&server, &bob_token).await, 2);

    let req = json!({"notification_ids": [n1, n3], "mark_all": false});
    let (_, res) = server.rpc(MARK, Some(&bob_token), req.clone()).await;
    assert_eq!(res["modified_count"], 1);
    assert_eq!(unread(&server, &bob_token).await, 1);

    let (_, res) = server.rpc(MARK, Some(&bob_token), req).await;
    assert_eq!(res["modified_count"], 0);
    assert_eq!(unread(&server, &bob_token).await, 1);

    let (_, res) = server
        .rpc(MARK, Some(&bob_token), json!({"notification_ids": []}))
        .await;
    assert_eq!(res["modified_count"], 0);

    let (_, res) = server
        .rpc(MARK, Some(&bob_token), json!({"mark_all": true}))
        .await;
    assert_eq!(res["modified_count"], 1);
    assert_eq!(unread(&server, &bob_token).await, 0);
}

#[tokio::test]
async fn foreign_rows_are_untouched() {
    let server = common::setup().await;
    let (alice_id, alice_token) = server.signup("alice").await;
    let (bob_id, bob_token) = server.signup("bob").await;

    let producer = LogProducer::new(server.pool.clone());
    originator::trigger(&producer, triggered(bob_id, alice_id, "for bob")).await;
    server.consumer().poll_once().await.unwrap();

    let bob_list = list(&server, &bob_token, json!({})).await;
    let bob_note = bob_list["notifications"][0]["id"].as_str().unwrap().to_string();

    let (status, res) = server
        .rpc(MARK, Some(&alice_token), json!({"notification_ids": [bob_note.clone()]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["modified_count"], 0);

    let (status, _) = server
        .rpc(
            "notification.NotificationService/DeleteNotification",
            Some(&alice_token),
            json!({"notification_id": bob_note}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(unread(&server, &bob_token).await, 1);
}

#[tokio::test]
async fn other_users_id_is_permission_denied() {
    let server = common::setup().await;
    let (alice_id, _) = server.signup("alice").await;
    let (bob_id, bob_token) = server.signup("bob").await;

    let (status, body) = server
        .rpc(LIST, Some(&bob_token), json!({"user_id": alice_id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission_denied");

    let (status, _) = server
        .rpc(
            "notification.NotificationService/SubscribeNotifications",
            Some(&bob_token),
            json!({"user_id": alice_id}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .rpc(UNREAD, Some(&bob_token), json!({"user_id": bob_id}))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn pagination_is_clamped() {
    let server = common::setup().await;
    let (alice_id, _) = server.signup("alice").await;
    let (bob_id, bob_token) = server.signup("bob").await;

    let producer = LogProducer::new(server.pool.clone());
    for i in 0..12 {
        originator::trigger(&producer, triggered(bob_id, alice_id, &format!("n{i}"))).await;
    }
    server.consumer().poll_once().await.unwrap();

    let body = list(&server, &bob_token, json!({"page": 0, "page_size": 0})).await;
    assert_eq!(body["page"], 1);
    assert_eq!(body["page_size"], 10);
    assert_eq!(body["total"], 12);
    assert_eq!(body["unread_count"], 12);
    assert_eq!(body["notifications"].as_array().unwrap().len(), 10);
    // Newest first.
    assert_eq!(body["notifications"][0]["content"], "n11");

    let body = list(&server, &bob_token, json!({"page": 2, "page_size": 10})).await;
    assert_eq!(body["notifications"].as_array().unwrap().len(), 2);
    assert_eq!(body["notifications"][1]["content"], "n0");

    let body = list(&server, &bob_token, json!({"page_size": 1000})).await;
    assert_eq!(body["page_size"], 100);

    // Negative sizes fall back to the default, same as zero.
    let body = list(&server, &bob_token, json!({"page_size": -5})).await;
    assert_eq!(body["page_size"], 10);
    assert_eq!(body["notifications"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn delete_single_and_bulk() {
    let server = common::setup().await;
    let (alice_id, _) = server.signup("alice").await;
    let (bob_id, bob_token) = server.signup("bob").await;

    let producer = LogProducer::new(server.pool.clone());
    for content in ["a", "b", "c"] {
        originator::trigger(&producer, triggered(bob_id, alice_id, content)).await;
    }
    server.consumer().poll_once().await.unwrap();

    let body = list(&server, &bob_token, json!({})).await;
    let ids: Vec<String> = body["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap().to_string())
        .collect();

    let (status, _) = server
        .rpc(
            "notification.NotificationService/DeleteNotification",
            Some(&bob_token),
            json!({"notification_id": ids[0]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .rpc(
            "notification.NotificationService/DeleteNotification",
            Some(&bob_token),
            json!({"notification_id": "not-a-uuid"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .rpc(
            "notification.NotificationService/DeleteNotifications",
            Some(&bob_token),
            json!({"notification_ids": [ids[0], ids[1], ids[2]]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_count"], 2);
    assert_eq!(list(&server, &bob_token, json!({})).await["total"], 0);
}

async fn replay_same_event(server: &common::TestServer, recipient_id: i64) {
    let producer = LogProducer::new(server.pool.clone());
    let envelope = Envelope::new(
        EventType::NotificationTriggered,
        "qa-service",
        triggered(recipient_id, 999, "replayed"),
    );
    for _ in 0..2 {
        publish(&producer, TOPIC_NOTIFICATION_EVENTS, recipient_id.to_string(), &envelope)
            .await
            .unwrap();
    }
    let outcome = server.consumer().poll_once().await.unwrap();
    assert_eq!(outcome.consumed, 2);
    assert_eq!(outcome.failed, 0);
}

#[tokio::test]
async fn replayed_event_is_duplicated_by_default() {
    let server = common::setup().await;
    let (bob_id, bob_token) = server.signup("bob").await;

    replay_same_event(&server, bob_id).await;
    assert_eq!(unread(&server, &bob_token).await, 2);
}

#[tokio::test]
async fn replayed_event_is_suppressed_when_configured() {
    let server = common::setup_with(|config| {
        config.notifications.idempotency = Idempotency::SuppressByEventId;
    })
    .await;
    let (bob_id, bob_token) = server.signup("bob").await;

    replay_same_event(&server, bob_id).await;
    assert_eq!(unread(&server, &bob_token).await, 1);
}
