use thiserror::Error;

/// Errors from producing to or consuming from the topic log.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event log database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("event log pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event log task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for EventError {
    fn from(e: tokio::task::JoinError) -> Self {
        EventError::Task(e.to_string())
    }
}

/// Failure reported by an event handler. The consumer logs it and moves on.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}
