//! Wire frames.
//!
//! Frame layout (8 bytes header + payload, all integers big-endian):
//!
//! ```text
//! +-------+------+--------+----------+-------+---------+
//! | flags | type |  size  | reserved | track | channel |
//! | 1     | 1    | 2      | 1        | 1     | 2       |
//! +-------+------+--------+----------+-------+---------+
//! | payload (size - 8 bytes)                           |
//! +----------------------------------------------------+
//! ```
//!
//! `size` counts the header and the payload together, so the largest payload
//! that fits is [`MAX_PAYLOAD`]. Only the low 4 bits of the track byte are
//! carried on the wire.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the fixed frame header in bytes (1+1+2+1+1+2 = 8).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - FRAME_HEADER_SIZE;

/// Mask applied to the track id before it goes on the wire.
pub const TRACK_MASK: u8 = 0x0F;

/// Frame flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Frame belongs to the first segment of a command.
    pub const FIRST_SEG: u8 = 0x08;
    /// Frame belongs to the last segment of a command.
    pub const LAST_SEG: u8 = 0x04;
    /// First frame of a segment.
    pub const FIRST_FRM: u8 = 0x02;
    /// Last frame of a segment.
    pub const LAST_FRM: u8 = 0x01;

    pub fn new() -> Self {
        Self(0)
    }

    /// Flags for a command that fits in one segment carried by one frame.
    pub fn complete() -> Self {
        Self(Self::FIRST_SEG | Self::LAST_SEG | Self::FIRST_FRM | Self::LAST_FRM)
    }

    /// Wraps a raw flags byte. Reserved bits are kept as received.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn with_first_segment(mut self) -> Self {
        self.0 |= Self::FIRST_SEG;
        self
    }

    pub fn with_last_segment(mut self) -> Self {
        self.0 |= Self::LAST_SEG;
        self
    }

    pub fn with_first_frame(mut self) -> Self {
        self.0 |= Self::FIRST_FRM;
        self
    }

    pub fn with_last_frame(mut self) -> Self {
        self.0 |= Self::LAST_FRM;
        self
    }

    pub fn is_first_segment(&self) -> bool {
        self.0 & Self::FIRST_SEG != 0
    }

    pub fn is_last_segment(&self) -> bool {
        self.0 & Self::LAST_SEG != 0
    }

    pub fn is_first_frame(&self) -> bool {
        self.0 & Self::FIRST_FRM != 0
    }

    pub fn is_last_frame(&self) -> bool {
        self.0 & Self::LAST_FRM != 0
    }
}

impl From<u8> for FrameFlags {
    fn from(bits: u8) -> Self {
        Self::from_bits(bits)
    }
}

/// Well-known frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegmentType {
    Control = 0,
    Command = 1,
    Header = 2,
    Body = 3,
}

impl TryFrom<u8> for SegmentType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SegmentType::Control),
            1 => Ok(SegmentType::Command),
            2 => Ok(SegmentType::Header),
            3 => Ok(SegmentType::Body),
            other => Err(ProtocolError::UnknownSegmentType(other)),
        }
    }
}

impl From<SegmentType> for u8 {
    fn from(ty: SegmentType) -> Self {
        ty as u8
    }
}

/// A single wire frame.
///
/// Frames are immutable once built; the only validation is the payload size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    flags: FrameFlags,
    frame_type: u8,
    track: u8,
    channel: u16,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame, rejecting payloads larger than [`MAX_PAYLOAD`].
    pub fn new(
        flags: FrameFlags,
        frame_type: u8,
        track: u8,
        channel: u16,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        Ok(Self {
            flags,
            frame_type,
            track,
            channel,
            payload,
        })
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    /// Returns the frame type as a known segment type, if it is one.
    pub fn segment_type(&self) -> Option<SegmentType> {
        SegmentType::try_from(self.frame_type).ok()
    }

    /// Track id as given at construction (not masked).
    pub fn track(&self) -> u8 {
        self.track
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_first_segment(&self) -> bool {
        self.flags.is_first_segment()
    }

    pub fn is_last_segment(&self) -> bool {
        self.flags.is_last_segment()
    }

    pub fn is_first_frame(&self) -> bool {
        self.flags.is_first_frame()
    }

    pub fn is_last_frame(&self) -> bool {
        self.flags.is_last_frame()
    }

    /// Total on-wire size (header + payload).
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{} {} {} {} b\"{}\"",
            u8::from(self.is_first_segment()),
            u8::from(self.is_last_segment()),
            u8::from(self.is_first_frame()),
            u8::from(self.is_last_frame()),
            self.frame_type,
            self.track,
            self.channel,
            self.payload.escape_ascii()
        )
    }
}

/// The fixed 8-byte header preceding every frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: FrameFlags,
    pub frame_type: u8,
    /// Header plus payload length.
    pub size: u16,
    /// Low 4 bits only.
    pub track: u8,
    pub channel: u16,
}

impl FrameHeader {
    /// Builds the header for a frame, masking the track id.
    pub fn for_frame(frame: &Frame) -> Self {
        // Frame::new bounds the payload, so this cannot truncate.
        let size = frame.wire_size() as u16;
        Self {
            flags: frame.flags,
            frame_type: frame.frame_type,
            size,
            track: frame.track & TRACK_MASK,
            channel: frame.channel,
        }
    }

    /// Appends the encoded header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE);
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.frame_type);
        buf.put_u16(self.size);
        buf.put_u8(0);
        buf.put_u8(self.track & TRACK_MASK);
        buf.put_u16(self.channel);
    }

    /// Encodes the header into a fixed array.
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE);
        self.encode(&mut buf);
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decodes a header. Reserved bits are ignored; the size is not checked.
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        let flags = FrameFlags::from_bits(buf.get_u8());
        let frame_type = buf.get_u8();
        let size = buf.get_u16();
        buf.advance(1);
        let track = buf.get_u8() & TRACK_MASK;
        let channel = buf.get_u16();

        Self {
            flags,
            frame_type,
            size,
            track,
            channel,
        }
    }

    /// Number of payload bytes following this header.
    pub fn payload_len(&self) -> Result<usize, ProtocolError> {
        (self.size as usize)
            .checked_sub(FRAME_HEADER_SIZE)
            .ok_or(ProtocolError::InvalidFrameSize { size: self.size })
    }

    /// Builds a frame from this header and the payload that followed it.
    pub fn into_frame(self, payload: impl Into<Bytes>) -> Result<Frame, ProtocolError> {
        Frame::new(
            self.flags,
            self.frame_type,
            self.track,
            self.channel,
            payload,
        )
    }
}
