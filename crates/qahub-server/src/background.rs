//! Background tasks for the QAHub server.
//!
//! Includes:
//! - The `notification_events` consumer feeding the notification service.
//! - Purging expired entries from the token revocation set.

use std::sync::Arc;
use std::time::Duration;

use qahub_auth::revocation;
use qahub_db::DbPool;
use qahub_events::Consumer;
use qahub_types::{EventType, GROUP_NOTIFICATION_CONSUMER, TOPIC_NOTIFICATION_EVENTS};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EventsConfig;
use crate::notification_service::NotificationService;

/// Builds the notification consumer bound to `notification_events`.
pub fn notification_consumer(
    pool: DbPool,
    service: Arc<NotificationService>,
    config: &EventsConfig,
) -> Consumer {
    Consumer::new(pool, TOPIC_NOTIFICATION_EVENTS, GROUP_NOTIFICATION_CONSUMER)
        .with_poll_interval(config.poll_interval())
        .with_batch_size(config.batch_size)
        .with_handler(EventType::NotificationTriggered, service)
}

/// Spawns the notification consumer loop.
pub fn spawn_notification_consumer(
    pool: DbPool,
    service: Arc<NotificationService>,
    config: &EventsConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let consumer = notification_consumer(pool, service, config);
    tokio::spawn(consumer.run(shutdown))
}

/// Periodically deletes revocation entries whose tokens have expired anyway.
///
/// Runs until `shutdown` turns true. An interval of zero disables the task.
pub async fn start_revocation_purge_task(
    pool: DbPool,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval_secs == 0 {
        tracing::warn!("revocation purge task disabled (interval=0)");
        return;
    }
    let interval = Duration::from_secs(interval_secs);
    tracing::info!(interval_secs, "starting revocation purge task");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let pool = pool.clone();
        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            revocation::purge_expired(&conn, qahub_types::time::now_unix())
                .map_err(|e| e.to_string())
        })
        .await;

        match res {
            Ok(Ok(removed)) => {
                if removed > 0 {
                    tracing::info!(removed, "purged expired revocation entries");
                }
            }
            Ok(Err(e)) => {
                tracing::error!("failed to purge revocation entries: {}", e);
            }
            Err(e) => {
                tracing::error!("revocation purge task join error: {}", e);
            }
        }
    }

    tracing::info!("revocation purge task stopped");
}
