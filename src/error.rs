use std::path::PathBuf;

use thiserror::Error;

/// A request could not be completed or came back with a non-success status.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not decode body of {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    /// Rate limiting, upstream 5xx and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Timeout { .. } => true,
            TransportError::Request { source, .. } => source.is_connect(),
            TransportError::Decode { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Cancellation was observed before the unit started.
    Cancelled,
    /// A listing entry lacked a required field.
    Malformed,
}

/// Result of one unit of work (proceeding, date or statement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped(SkipReason),
    Failed(String),
}

impl Outcome {
    pub fn cancelled() -> Self {
        Outcome::Skipped(SkipReason::Cancelled)
    }
}
