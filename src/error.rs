//! Error types for the Nocturne client.

use thiserror::Error;

/// Errors that can occur when using the Nocturne client.
#[derive(Debug, Error)]
pub enum NocturneError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection is down. Outbound game messages that hit this error
    /// are still queued and flushed on the next successful connect; after
    /// [`shutdown`] the loop has stopped and nothing more is sent.
    ///
    /// [`shutdown`]: crate::GameClient::shutdown
    #[error("not connected to server")]
    NotConnected,

    /// A local precondition for an outbound action failed (e.g. voting while
    /// dead, or outside a voting phase). Nothing was sent.
    #[error("action not permitted: {0}")]
    NotEligible(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Nocturne client operations.
pub type Result<T> = std::result::Result<T, NocturneError>;
