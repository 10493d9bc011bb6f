//! Client side of the QAHub notification stream.
//!
//! [`NotificationSubscriber`] keeps one `SubscribeNotifications` stream open
//! for a logged-in user. Whenever the stream ends it waits according to a
//! [`Backoff`] and subscribes again. After every successful connect it
//! fetches the first page of `GetNotifications`, so anything pushed while
//! the stream was down still reaches the handler.

mod backoff;

use std::sync::Arc;

use futures_util::StreamExt;
use qahub_types::time::WireTimestamp;
use qahub_types::{NotificationKind, NotificationStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sse_stream::SseStream;
use thiserror::Error;
use tokio::sync::watch;

pub use backoff::{Backoff, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};

const SUBSCRIBE_METHOD: &str = "notification.NotificationService/SubscribeNotifications";
const LIST_METHOD: &str = "notification.NotificationService/GetNotifications";
const CATCH_UP_PAGE_SIZE: u32 = 10;

/// A notification as received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub kind: NotificationKind,
    pub content: String,
    pub target_url: String,
    pub status: NotificationStatus,
    pub created_at: WireTimestamp,
    #[serde(default)]
    pub created_at_display: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: i64,
    pub unread_count: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} ({code}): {message}")]
    Rpc {
        status: u16,
        code: String,
        message: String,
    },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("event stream error: {0}")]
    Stream(String),
}

impl ClientError {
    /// True when retrying with the same token cannot succeed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::Rpc { status: 401 | 403, .. })
    }
}

/// Receives what the subscriber reads.
pub trait NotificationHandler: Send + Sync {
    /// A notification pushed over the live stream.
    fn on_notification(&self, notification: Notification);

    /// The first page of notifications, fetched after each connect.
    fn on_catch_up(&self, _page: NotificationPage) {}
}

/// How a single connected stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server finished the response (supersession, shutdown, lag).
    Closed,
    /// Local shutdown was requested.
    Shutdown,
}

pub struct NotificationSubscriber {
    http: reqwest::Client,
    base_url: String,
    token: String,
    backoff: Backoff,
    handler: Arc<dyn NotificationHandler>,
}

impl NotificationSubscriber {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            backoff: Backoff::default(),
            handler,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .post(self.url(method))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        Err(ClientError::Rpc {
            status: status.as_u16(),
            code: body["code"].as_str().unwrap_or("unknown").to_string(),
            message: body["message"].as_str().unwrap_or_default().to_string(),
        })
    }

    /// Fetches one page of the caller's notifications, newest first.
    pub async fn fetch_page(&self, page: u32, page_size: u32) -> Result<NotificationPage, ClientError> {
        let response = self
            .call(LIST_METHOD, json!({"page": page, "page_size": page_size}))
            .await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads one opened stream to its end, dispatching every
    /// `notification` event to the handler.
    async fn pump(
        &self,
        response: reqwest::Response,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, ClientError> {
        let mut events = std::pin::pin!(SseStream::from_byte_stream(response.bytes_stream()));

        loop {
            tokio::select! {
                () = shutdown_requested(shutdown) => return Ok(StreamEnd::Shutdown),
                event = events.next() => {
                    let sse = match event {
                        Some(Ok(sse)) => sse,
                        Some(Err(e)) => return Err(ClientError::Stream(e.to_string())),
                        None => return Ok(StreamEnd::Closed),
                    };
                    if sse.event.as_deref() != Some("notification") {
                        continue;
                    }
                    let Some(data) = sse.data else {
                        continue;
                    };
                    match serde_json::from_str::<Notification>(&data) {
                        Ok(notification) => {
                            tracing::debug!(notification_id = %notification.id, "notification received");
                            self.handler.on_notification(notification);
                        }
                        Err(e) => tracing::warn!("undecodable notification frame: {}", e),
                    }
                }
            }
        }
    }

    /// Connects once, catches up, and reads until the stream ends.
    pub async fn connect_once(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, ClientError> {
        let response = self.call(SUBSCRIBE_METHOD, json!({})).await?;
        self.backoff.reset();
        tracing::info!(base_url = %self.base_url, "notification stream connected");

        match self.fetch_page(1, CATCH_UP_PAGE_SIZE).await {
            Ok(page) => self.handler.on_catch_up(page),
            Err(e) => tracing::warn!("catch-up fetch failed: {}", e),
        }

        self.pump(response, shutdown).await
    }

    /// Keeps the stream open until `shutdown` turns true.
    ///
    /// Returns an error only when the server rejects the token, since no
    /// amount of retrying fixes that.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ClientError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.connect_once(&mut shutdown).await {
                Ok(StreamEnd::Shutdown) => return Ok(()),
                Ok(StreamEnd::Closed) => tracing::info!("notification stream closed by server"),
                Err(e) if e.is_auth_failure() => {
                    tracing::error!("notification stream rejected: {}", e);
                    return Err(e);
                }
                Err(e) => tracing::warn!("notification stream failed: {}", e),
            }

            let delay = self.backoff.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting notification stream");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                () = shutdown_requested(&mut shutdown) => return Ok(()),
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
