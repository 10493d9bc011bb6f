use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use qahub_db::DbPool;
use qahub_events::{
    log, publish, ConsumeContext, Consumer, Envelope, EventHandler, HandlerError, LogProducer,
    Producer,
};
use qahub_types::{EventType, NotificationKind, NotificationTriggeredPayload};

const TOPIC: &str = "notification_events";
const GROUP: &str = "notification-consumer";

fn pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let pool = qahub_db::create_pool(path.to_str().unwrap(), Default::default()).unwrap();
    qahub_db::run_migrations(&pool.get().unwrap()).unwrap();
    (dir, pool)
}

fn triggered(recipient_id: i64, content: &str) -> Envelope<NotificationTriggeredPayload> {
    Envelope::new(
        EventType::NotificationTriggered,
        "qa-service",
        NotificationTriggeredPayload {
            recipient_id,
            sender_id: 3,
            sender_name: "alice".into(),
            notification_kind: NotificationKind::NewAnswer,
            content: content.into(),
            target_url: "/questions/10#answer-1".into(),
        },
    )
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(i64, String)>>,
    fail_on: Option<String>,
}

impl EventHandler for Recorder {
    fn handle<'a>(
        &'a self,
        ctx: &'a ConsumeContext,
        _event_type: EventType,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let payload: NotificationTriggeredPayload = serde_json::from_slice(payload)?;
            self.seen
                .lock()
                .unwrap()
                .push((ctx.offset, payload.content.clone()));
            if self.fail_on.as_deref() == Some(payload.content.as_str()) {
                return Err(HandlerError::failed("boom"));
            }
            Ok(())
        })
    }
}

fn contents(recorder: &Recorder) -> Vec<String> {
    recorder
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|(_, c)| c.clone())
        .collect()
}

#[tokio::test]
async fn records_are_dispatched_in_publish_order() {
    let (_dir, pool) = pool();
    let producer = LogProducer::new(pool.clone());
    for c in ["a", "b", "c"] {
        publish(&producer, TOPIC, "5", &triggered(5, c)).await.unwrap();
    }

    let recorder = Arc::new(Recorder::default());
    let consumer = Consumer::new(pool.clone(), TOPIC, GROUP)
        .with_handler(EventType::NotificationTriggered, recorder.clone());

    let outcome = consumer.poll_once().await.unwrap();
    assert_eq!(outcome.consumed, 3);
    assert_eq!(outcome.handled, 3);
    assert_eq!(contents(&recorder), vec!["a", "b", "c"]);

    // Everything is committed; a second pass sees nothing.
    assert_eq!(consumer.poll_once().await.unwrap().consumed, 0);
    let conn = pool.get().unwrap();
    assert_eq!(
        log::committed_offset(&conn, TOPIC, GROUP).unwrap(),
        log::latest_offset(&conn, TOPIC).unwrap()
    );
}

#[tokio::test]
async fn handler_error_still_advances_offset() {
    let (_dir, pool) = pool();
    let producer = LogProducer::new(pool.clone());
    publish(&producer, TOPIC, "5", &triggered(5, "bad")).await.unwrap();
    publish(&producer, TOPIC, "5", &triggered(5, "good")).await.unwrap();

    let recorder = Arc::new(Recorder {
        fail_on: Some("bad".into()),
        ..Default::default()
    });
    let consumer = Consumer::new(pool, TOPIC, GROUP)
        .with_handler(EventType::NotificationTriggered, recorder.clone());

    let outcome = consumer.poll_once().await.unwrap();
    assert_eq!(outcome.consumed, 2);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.handled, 1);
    assert_eq!(consumer.poll_once().await.unwrap().consumed, 0);
    assert_eq!(contents(&recorder), vec!["bad", "good"]);
}

#[tokio::test]
async fn unknown_types_and_garbage_are_skipped() {
    let (_dir, pool) = pool();
    let producer = LogProducer::new(pool.clone());
    producer
        .send(
            TOPIC,
            "5".into(),
            br#"{"header":{"event_id":"6f1d2c8e-1d1c-4b7e-9a55-0d9f1b3e2a11","type":"vote.cast","source":"x","timestamp":"2024-01-01T00:00:00Z"},"payload":{}}"#.to_vec(),
        )
        .await
        .unwrap();
    producer.send(TOPIC, "5".into(), b"not json".to_vec()).await.unwrap();
    publish(&producer, TOPIC, "5", &triggered(5, "real")).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let consumer = Consumer::new(pool, TOPIC, GROUP)
        .with_handler(EventType::NotificationTriggered, recorder.clone());

    let outcome = consumer.poll_once().await.unwrap();
    assert_eq!(outcome.consumed, 3);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.handled, 1);
    assert_eq!(contents(&recorder), vec!["real"]);
}

#[tokio::test]
async fn groups_consume_independently() {
    let (_dir, pool) = pool();
    let producer = LogProducer::new(pool.clone());
    publish(&producer, TOPIC, "5", &triggered(5, "x")).await.unwrap();

    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    let a = Consumer::new(pool.clone(), TOPIC, "group-a")
        .with_handler(EventType::NotificationTriggered, first.clone());
    let b = Consumer::new(pool, TOPIC, "group-b")
        .with_handler(EventType::NotificationTriggered, second.clone());

    a.poll_once().await.unwrap();
    b.poll_once().await.unwrap();
    assert_eq!(contents(&first), vec!["x"]);
    assert_eq!(contents(&second), vec!["x"]);
}

#[tokio::test]
async fn batch_size_limits_one_pass() {
    let (_dir, pool) = pool();
    let producer = LogProducer::new(pool.clone());
    for c in ["1", "2", "3"] {
        publish(&producer, TOPIC, "5", &triggered(5, c)).await.unwrap();
    }

    let recorder = Arc::new(Recorder::default());
    let consumer = Consumer::new(pool, TOPIC, GROUP)
        .with_batch_size(2)
        .with_handler(EventType::NotificationTriggered, recorder.clone());

    assert_eq!(consumer.poll_once().await.unwrap().consumed, 2);
    assert_eq!(consumer.poll_once().await.unwrap().consumed, 1);
    assert_eq!(contents(&recorder), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn run_loop_picks_up_new_records_and_stops_on_shutdown() {
    let (_dir, pool) = pool();
    let recorder = Arc::new(Recorder::default());
    let consumer = Consumer::new(pool.clone(), TOPIC, GROUP)
        .with_poll_interval(Duration::from_millis(10))
        .with_handler(EventType::NotificationTriggered, recorder.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(consumer.run(shutdown_rx));

    let producer = LogProducer::new(pool);
    publish(&producer, TOPIC, "5", &triggered(5, "late")).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while contents(&recorder).is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "consumer never saw the record");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("consumer should stop")
        .unwrap();
    assert_eq!(contents(&recorder), vec!["late"]);
}

#[tokio::test]
async fn dropped_shutdown_sender_keeps_the_poll_interval() {
    let (_dir, pool) = pool();
    let producer = LogProducer::new(pool.clone());
    publish(&producer, TOPIC, "5", &triggered(5, "first")).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let consumer = Consumer::new(pool, TOPIC, GROUP)
        .with_poll_interval(Duration::from_secs(2))
        .with_handler(EventType::NotificationTriggered, recorder.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(consumer.run(shutdown_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while contents(&recorder).is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "consumer never saw the record");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The consumer is now in its idle sleep. Losing the sender must not
    // turn that sleep into a tight re-poll loop.
    drop(shutdown_tx);
    publish(&producer, TOPIC, "5", &triggered(5, "second")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(contents(&recorder), vec!["first"]);
    assert!(!task.is_finished());

    // The next scheduled poll still happens.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while contents(&recorder).len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "consumer stopped polling");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(contents(&recorder), vec!["first", "second"]);
    task.abort();
}
