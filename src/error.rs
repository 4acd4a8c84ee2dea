//! Error types for operation tracking.
//!
//! A single [`Error`] enum covers the failure surface of the crate:
//! transport failures, server-reported job failures, event-stream loss,
//! handler registry preconditions, and caller-driven wait aborts.
//!
//! `Error` is `Clone`: a terminal outcome is captured once per operation
//! and handed back from every subsequent wait, so the stored error must be
//! reproducible without re-deriving it. For the same reason
//! `serde_json::Error` is carried as its rendered message rather than as a
//! source.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by operation tracking.
///
/// # Examples
///
/// ```
/// use opstream::Error;
///
/// let err = Error::OperationFailed {
///     id: "op-1".to_string(),
///     message: "disk full".to_string(),
/// };
/// assert!(err.to_string().contains("op-1"));
/// assert!(err.to_string().contains("disk full"));
/// ```
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A request or stream operation failed at the transport layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server marked the operation terminal with a failure detail.
    /// The message is surfaced verbatim from the server.
    #[error("operation {id} failed: {message}")]
    OperationFailed {
        /// Identifier of the failed operation.
        id: String,
        /// Server-reported failure detail.
        message: String,
    },

    /// The event stream ended before the operation's own terminal event
    /// arrived.
    #[error("event stream closed: {reason}")]
    StreamClosed {
        /// Why the stream ended (error text, or a synthesized reason for a
        /// clean end-of-stream or an explicit disconnect).
        reason: String,
    },

    /// A handler was registered against a listener whose stream has
    /// already closed.
    #[error("event listener already closed")]
    ListenerClosed,

    /// A handler id was removed that is not registered on the listener.
    #[error("no handler registered for this id")]
    HandlerNotFound,

    /// The server connection does not support event streams, so handlers
    /// cannot be attached. Waiting still works through polling.
    #[error("server connection does not support event streams")]
    EventsUnsupported,

    /// A remote operation has no associated target operation.
    #[error("no associated target operation")]
    NoTarget,

    /// The caller aborted the wait.
    #[error("wait cancelled by caller")]
    Cancelled,

    /// The wait deadline expired before the operation reached a terminal
    /// state.
    #[error("wait deadline exceeded")]
    Timeout,

    /// A payload could not be encoded or decoded.
    #[error("invalid payload: {0}")]
    Json(String),
}

impl Error {
    /// Creates a transport error from any displayable source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
