//! Error types surfaced by handlers and the upgrade path.
//!
//! # Responsibilities
//! - Carry an HTTP status and a public message out of a handler
//! - Carry a close code and reason out of a websocket callback
//! - Keep the underlying cause for logs without exposing it to clients
//!
//! # Design Decisions
//! - Handlers return `BoxError`, so `?` works on any error type
//! - The status capability is checked with `downcast_ref::<HttpError>()`;
//!   anything else is an opaque internal fault

use axum::http::StatusCode;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Type-erased error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error that knows which HTTP status and message to answer with.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    #[source]
    internal: Option<BoxError>,
}

impl HttpError {
    /// Create an error answered with `status` and `message`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            internal: None,
        }
    }

    /// Wrap an internal fault: answered as a plain 500, the cause is kept for logs.
    pub fn internal(err: impl Into<BoxError>) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        Self {
            status,
            message: canonical_reason(status).to_string(),
            internal: Some(err.into()),
        }
    }

    /// Attach an underlying cause.
    pub fn with_internal(mut self, err: impl Into<BoxError>) -> Self {
        self.internal = Some(err.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An error that tells the upgrade path how to close the connection.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct WebSocketError {
    code: CloseCode,
    message: String,
    #[source]
    internal: Option<BoxError>,
}

impl WebSocketError {
    pub fn new(code: CloseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            internal: None,
        }
    }

    /// Wrap an internal fault: closed with 1011, the cause is kept for logs.
    pub fn internal(err: impl Into<BoxError>) -> Self {
        Self {
            code: CloseCode::Error,
            message: INTERNAL_CLOSE_REASON.to_string(),
            internal: Some(err.into()),
        }
    }

    pub fn code(&self) -> CloseCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub(crate) const INTERNAL_CLOSE_REASON: &str = "internal error";

/// Failure to negotiate a websocket upgrade.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("websocket upgrade requires GET")]
    MethodNotGet,

    #[error("missing or invalid `{0}` header")]
    InvalidHeader(&'static str),

    #[error("unsupported websocket version")]
    UnsupportedVersion,

    #[error("connection is not upgradable")]
    NotUpgradable,

    #[error("upgrade failed: {0}")]
    Hyper(#[from] hyper::Error),
}

impl UpgradeError {
    /// Status the client is answered with when the handshake is rejected.
    pub fn status(&self) -> StatusCode {
        match self {
            UpgradeError::UnsupportedVersion => StatusCode::UPGRADE_REQUIRED,
            UpgradeError::NotUpgradable | UpgradeError::Hyper(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<UpgradeError> for HttpError {
    fn from(err: UpgradeError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            HttpError::internal(err)
        } else {
            let message = err.to_string();
            HttpError::new(status, message).with_internal(err)
        }
    }
}

/// Operation on a websocket handle failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The handle was released when its callback returned.
    #[error("websocket connection is closed")]
    Closed,

    #[error("websocket protocol error: {0}")]
    Protocol(#[from] tungstenite::Error),
}

/// Status and public message for an arbitrary handler error.
///
/// Errors that are not an [`HttpError`] map to a bare 500 so their text
/// never reaches the client.
pub fn status_and_message(err: &(dyn std::error::Error + 'static)) -> (StatusCode, String) {
    match err.downcast_ref::<HttpError>() {
        Some(e) => (e.status(), e.message().to_string()),
        None => {
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            (status, canonical_reason(status).to_string())
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

pub(crate) fn canonical_reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown Status")
}
