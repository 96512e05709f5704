//! Protocol version handshake.
//!
//! Both peers open the connection with an 8-byte preamble:
//!
//! ```text
//! +---------+-------+----------+-------+-------+
//! | literal | class | instance | major | minor |
//! | 4 bytes | 1     | 1        | 1     | 1     |
//! +---------+-------+----------+-------+-------+
//! ```
//!
//! Decoding never validates the literal or the version; deciding whether the
//! peer speaks an acceptable protocol is left to the caller.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// Protocol name literal sent at the start of the handshake.
pub const PROTOCOL_LITERAL: [u8; 4] = *b"AMQP";

/// Size of the handshake preamble in bytes.
pub const PROTOCOL_HEADER_SIZE: usize = 8;

/// Fixed class byte.
pub const PROTOCOL_CLASS: u8 = 1;

/// Fixed instance byte.
pub const PROTOCOL_INSTANCE: u8 = 1;

/// A decoded handshake preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub literal: [u8; 4],
    pub class: u8,
    pub instance: u8,
    pub major: u8,
    pub minor: u8,
}

impl ProtocolHeader {
    /// The preamble this side sends for the given version.
    pub fn new(major: u8, minor: u8) -> Self {
        Self {
            literal: PROTOCOL_LITERAL,
            class: PROTOCOL_CLASS,
            instance: PROTOCOL_INSTANCE,
            major,
            minor,
        }
    }

    /// Returns `(major, minor)`.
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    /// The literal as text, lossily decoded.
    pub fn literal_str(&self) -> String {
        String::from_utf8_lossy(&self.literal).into_owned()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(PROTOCOL_HEADER_SIZE);
        buf.put_slice(&self.literal);
        buf.put_u8(self.class);
        buf.put_u8(self.instance);
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
    }

    pub fn to_bytes(&self) -> [u8; PROTOCOL_HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(PROTOCOL_HEADER_SIZE);
        self.encode(&mut buf);
        let mut out = [0u8; PROTOCOL_HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decode(bytes: &[u8; PROTOCOL_HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        let mut literal = [0u8; 4];
        buf.copy_to_slice(&mut literal);

        Self {
            literal,
            class: buf.get_u8(),
            instance: buf.get_u8(),
            major: buf.get_u8(),
            minor: buf.get_u8(),
        }
    }
}

impl fmt::Display for ProtocolHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{} {}-{}",
            self.literal.escape_ascii(),
            self.class,
            self.instance,
            self.major,
            self.minor
        )
    }
}
