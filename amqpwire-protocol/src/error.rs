//! Protocol error types.

use thiserror::Error;

/// Errors raised while building or decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("max payload size exceeded: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid frame size: {size} bytes is smaller than the frame header")]
    InvalidFrameSize { size: u16 },

    #[error("unknown segment type: {0}")]
    UnknownSegmentType(u8),
}
