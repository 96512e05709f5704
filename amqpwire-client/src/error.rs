//! Framer error types.

use amqpwire_protocol::ProtocolError;
use thiserror::Error;

/// Errors returned by [`Framer`](crate::Framer) and [`AsyncFramer`](crate::AsyncFramer).
#[derive(Debug, Error)]
pub enum FramerError {
    /// The connection is gone: the peer closed it, the abort predicate fired
    /// while waiting, or a transport error interrupted a partially read unit.
    /// Terminal for the framer that returned it.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport error raised before any byte of the current read was
    /// received, or while writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl FramerError {
    /// Returns whether this error ended the connection.
    pub fn is_closed(&self) -> bool {
        matches!(self, FramerError::ConnectionClosed)
    }
}
