//! Error types for tripwire.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job {job}: {reason}")]
    InvalidJob { job: String, reason: String },

    // Change detection errors
    #[error("Feed fetch failed: {0}")]
    Fetch(String),

    #[error("Build history lookup failed: {0}")]
    History(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Broker errors
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Queue admin failed for topic {topic}: {reason}")]
    QueueAdmin { topic: String, reason: String },

    #[error("Publish failed for uid {uid}: {reason}")]
    Publish { uid: String, reason: String },

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Errors that the next scheduler tick is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::History(_) | Error::Broker(_))
    }
}
