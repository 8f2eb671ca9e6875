//! Error types for Gantry
//!
//! Every failure a caller can observe while talking to a worker maps onto one
//! of these variants. Only `NetworkFailure` is ever retried, and only by the
//! request/response path.

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main error type for Gantry operations
#[derive(Debug, thiserror::Error)]
pub enum GantryError {
    /// The directory has no entry for this worker (decommissioned or never registered)
    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    /// The directory lookup itself failed
    #[error("worker directory unavailable while resolving '{worker}': {source}")]
    DirectoryUnavailable {
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connect or transport level failure talking to a worker
    #[error("network failure talking to {address}: {message}")]
    NetworkFailure { address: String, message: String },

    /// The worker's daemon answered with a structured rejection
    #[error("{0}")]
    Backend(BackendError),

    /// The retry budget ran out
    #[error("gave up on worker '{worker}' after {attempts} attempt(s) in {elapsed:?}: {last}")]
    Timeout {
        worker: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: Box<GantryError>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GantryError {
    /// Build a network failure for an address
    pub fn network(address: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::NetworkFailure {
            address: address.into(),
            message: message.to_string(),
        }
    }

    /// Whether the request/response path may retry after this error
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. })
    }

    /// The decoded backend rejection, if this is one
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            Self::Backend(e) => Some(e),
            _ => None,
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::WorkerNotFound(_) => StatusCode::NOT_FOUND,
            Self::DirectoryUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::NetworkFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::Backend(e) => {
                StatusCode::from_u16(e.status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structured error body returned by a worker's container daemon on a non-2xx status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendError {
    /// HTTP status the daemon answered with
    #[serde(skip)]
    pub status: u16,

    /// Daemon-side error kind (e.g. "ContainerNotFoundError")
    #[serde(rename = "Type", alias = "type", default)]
    pub kind: String,

    /// Human readable message
    #[serde(rename = "Message", alias = "message", default)]
    pub message: String,

    /// Container handle the error refers to, when there is one
    #[serde(rename = "Handle", alias = "handle", default)]
    pub handle: String,

    /// Undecoded response body
    #[serde(skip)]
    pub raw: String,
}

impl BackendError {
    /// Decode a daemon error body. A body that is not the expected JSON is
    /// still a rejection; the decode failure becomes the message.
    pub fn decode(status: u16, body: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(body).into_owned();

        match serde_json::from_slice::<BackendError>(body) {
            Ok(mut decoded) => {
                decoded.status = status;
                decoded.raw = raw;
                decoded
            }
            Err(e) => Self {
                status,
                message: format!("bad response: {}", e),
                raw,
                ..Default::default()
            },
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind.is_empty() {
            write!(f, "worker rejected request ({}): {}", self.status, self.message)
        } else {
            write!(
                f,
                "worker rejected request ({} {}): {}",
                self.status, self.kind, self.message
            )
        }
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for GantryError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

/// Result type alias for Gantry operations
pub type Result<T> = std::result::Result<T, GantryError>;
