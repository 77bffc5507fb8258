//! NETCONF engine error types.
//!
//! One enum covers the whole crate. The taxonomy matters more than the
//! shape: `Framing`, `NegotiationFailed` and `RouterConflict` are
//! session-fatal (the transport is discarded, the peer must reconnect),
//! while handler-level failures travel as structured
//! [`RpcError`](crate::protocol::RpcError) replies and never appear here.

use thiserror::Error;

/// NETCONF engine errors.
#[derive(Error, Debug)]
pub enum NetconfError {
    /// Malformed framing on the wire. Fatal for the session.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Failed to parse or serialize a protocol message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Malformed or incompatible `hello`. Fatal before Established.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Hello exchange did not complete within the configured bound.
    #[error("Negotiation timed out")]
    NegotiationTimeout,

    /// Protocol-level misuse (message in the wrong session state).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Two handlers claimed the same operation at singleton priority.
    /// A programming error in the handler wiring, fatal to the session.
    #[error("Handler conflict for operation '{0}': multiple singleton-priority claims")]
    RouterConflict(String),

    /// A call-home context was removed while a waiter was still pending;
    /// the device identified by the id will not connect.
    #[error("Call-home session for device '{0}' was cancelled")]
    CallHomeCancelled(String),

    /// Published to a stream the notification manager does not know.
    #[error("Unknown notification stream: {0}")]
    UnknownStream(String),

    /// Published after the notification manager was closed. A logic bug
    /// in the producer, not a runtime condition to recover from.
    #[error("Notification manager is closed")]
    NotificationManagerClosed,

    /// EXI transform failed to encode or decode a document.
    #[error("EXI transform error: {0}")]
    Exi(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Transport-level failure observed on the byte stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for NETCONF engine operations
pub type Result<T> = std::result::Result<T, NetconfError>;

impl From<toml::de::Error> for NetconfError {
    fn from(err: toml::de::Error) -> Self {
        NetconfError::Config(err.to_string())
    }
}

impl From<quick_xml::Error> for NetconfError {
    fn from(err: quick_xml::Error) -> Self {
        NetconfError::InvalidMessage(err.to_string())
    }
}
