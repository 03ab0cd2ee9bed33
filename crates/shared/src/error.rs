//! Error taxonomy shared between socket layer and its callers.

use thiserror::Error;

/// Errors surfaced by the socket layer to the immediate caller.
///
/// There are no retries anywhere in this layer: every variant propagates
/// straight up. Subscription race cancellation is deliberately absent from
/// this enum; it is not an error (see the subscription store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The connection was never established.
    #[error("socket is not connected")]
    NotConnected,

    /// The connection went away while a command was in flight. Pending
    /// acks are drained with this error rather than hanging forever.
    #[error("socket connection closed")]
    ConnectionClosed,

    /// The server answered a command with an `error` frame.
    #[error("rejected by server ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Transport-level failure (handshake, send, socket I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame that could not be serialized or parsed.
    #[error("protocol error: {0}")]
    Protocol(String),
}
