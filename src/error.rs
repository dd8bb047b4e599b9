//! Error types for the presence client.

use thiserror::Error;

/// Application-visible error code used when a failure has no
/// server-assigned close code (auth refusals, stop-retrying signals).
pub const CLIENT_ERROR_CODE: i32 = -1;

/// Errors that can occur when using the presence client.
#[derive(Debug, Clone, Error)]
pub enum PresenceError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// The transport reported an error event.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport connection closed.
    #[error("transport closed ({code}): {reason}")]
    TransportClosed {
        /// Close code reported by the transport (0 for a silent close).
        code: i32,
        /// Human-readable close reason, possibly empty.
        reason: String,
    },

    /// The server refused the connection; no further retries will help.
    #[error("server refused connection ({code}): {reason}")]
    ServerRefusal {
        /// Server-assigned close code.
        code: i32,
        /// Close reason sent by the server.
        reason: String,
    },

    /// A delegate signalled that reconnection attempts must stop.
    ///
    /// Returned by the authenticate delegate (or raised internally) to land
    /// the connection manager in its failed state instead of retrying.
    #[error("stop retrying: {0}")]
    StopRetrying(String),

    /// Failed to encode a value into the wire format.
    #[error(transparent)]
    Encode(#[from] crate::codec::EncodeError),

    /// Failed to decode a value from the wire format.
    #[error(transparent)]
    Decode(#[from] crate::codec::DecodeError),

    /// A frame decoded to bytes that do not follow the envelope schema.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A configuration option was outside its documented bounds.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Attempted an operation that requires a live connection.
    #[error("not connected to server")]
    NotConnected,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The pending operation was cancelled by a state change.
    #[error("operation cancelled")]
    Cancelled,
}

impl PresenceError {
    /// Returns `true` for failures that must stop the retry loop entirely.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::StopRetrying(_) | Self::ServerRefusal { .. } | Self::Config(_)
        )
    }
}

/// A specialized [`Result`] type for presence client operations.
pub type Result<T> = std::result::Result<T, PresenceError>;
