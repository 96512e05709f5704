//! # amqpwire-protocol
//!
//! Wire format for the AMQP 0-10 framing layer.
//!
//! This crate provides:
//! - The 8-byte protocol version handshake
//! - Frame values with segment/frame flags, track and channel ids
//! - Bit-exact header encoding and decoding
//!
//! Moving bytes over a stream is handled by `amqpwire-client`.

pub mod error;
pub mod frame;
pub mod header;

pub use error::ProtocolError;
pub use frame::{
    Frame, FrameFlags, FrameHeader, SegmentType, FRAME_HEADER_SIZE, MAX_PAYLOAD, TRACK_MASK,
};
pub use header::{ProtocolHeader, PROTOCOL_HEADER_SIZE, PROTOCOL_LITERAL};

/// Default AMQP port.
pub const DEFAULT_PORT: u16 = 5672;
