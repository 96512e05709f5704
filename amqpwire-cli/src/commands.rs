//! Command execution.

use amqpwire_client::{Abort, Framer, FramerError, Transport};
use amqpwire_protocol::{Frame, ProtocolHeader, PROTOCOL_LITERAL};
use bytes::Bytes;
use colored::Colorize;
use serde_json::{json, Value};

/// What the peer answered to our handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub header: ProtocolHeader,
    pub expected: (u8, u8),
}

impl ProbeReport {
    pub fn literal_ok(&self) -> bool {
        self.header.literal == PROTOCOL_LITERAL
    }

    pub fn version_ok(&self) -> bool {
        self.header.version() == self.expected
    }

    pub fn to_json(&self) -> Value {
        let h = &self.header;
        json!({
            "literal": h.literal_str(),
            "class": h.class,
            "instance": h.instance,
            "major": h.major,
            "minor": h.minor,
            "literal_ok": self.literal_ok(),
            "version_ok": self.version_ok(),
        })
    }

    pub fn render(&self) -> String {
        let h = &self.header;
        let verdict = if self.literal_ok() && self.version_ok() {
            "Compatible".green()
        } else if self.literal_ok() {
            "Version mismatch".yellow()
        } else {
            "Not AMQP".red()
        };

        format!(
            "{} {} (class {}, instance {}, version {}-{}; expected {}-{})",
            verdict,
            h.literal_str().cyan(),
            h.class,
            h.instance,
            h.major,
            h.minor,
            self.expected.0,
            self.expected.1
        )
    }
}

/// Sends our handshake and reads the peer's.
///
/// The answer is reported, not enforced: a peer announcing another protocol
/// or version still yields a report.
pub fn probe<S: Transport, A: Abort>(
    framer: &mut Framer<S, A>,
    major: u8,
    minor: u8,
) -> Result<ProbeReport, FramerError> {
    framer.write_header(major, minor)?;
    let header = framer.read_header()?;
    tracing::debug!("Peer answered {}", header);

    Ok(ProbeReport {
        header,
        expected: (major, minor),
    })
}

/// Performs the handshake, then writes a single frame.
pub fn send<S: Transport, A: Abort>(
    framer: &mut Framer<S, A>,
    major: u8,
    minor: u8,
    frame: &Frame,
) -> Result<ProbeReport, FramerError> {
    let report = probe(framer, major, minor)?;
    if !report.literal_ok() || !report.version_ok() {
        tracing::warn!("Sending despite peer header {}", report.header);
    }
    framer.write_frame(frame)?;
    Ok(report)
}

/// Decodes a payload argument, either as hex or as raw text.
pub fn parse_payload(input: &str, hex: bool) -> Result<Bytes, hex::FromHexError> {
    if hex {
        let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(Bytes::from(hex::decode(cleaned)?))
    } else {
        Ok(Bytes::copy_from_slice(input.as_bytes()))
    }
}

/// Parses a flags argument: decimal, or hex with a `0x` prefix.
pub fn parse_flags(input: &str) -> Result<u8, String> {
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => input.parse(),
    };
    match parsed {
        Ok(bits) if bits <= 0x0F => Ok(bits),
        Ok(bits) => Err(format!("flags 0x{:02x} set reserved bits", bits)),
        Err(e) => Err(format!("invalid flags '{}': {}", input, e)),
    }
}

pub fn frame_json(frame: &Frame) -> Value {
    let flags = frame.flags();
    json!({
        "flags": flags.bits(),
        "first_segment": flags.is_first_segment(),
        "last_segment": flags.is_last_segment(),
        "first_frame": flags.is_first_frame(),
        "last_frame": flags.is_last_frame(),
        "type": frame.frame_type(),
        "track": frame.track(),
        "channel": frame.channel(),
        "size": frame.wire_size(),
        "payload": hex::encode(frame.payload()),
    })
}

pub fn render_frame(frame: &Frame) -> String {
    format!(
        "{} {} ({} bytes on the wire)\n{}",
        "Sent".green(),
        frame,
        frame.wire_size(),
        hex::encode(frame.payload()).dimmed()
    )
}
