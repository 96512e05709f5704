//! Byte-stream endpoints for the blocking framer.

use std::io::{self, Read, Write};

/// A connected, bidirectional byte stream.
///
/// `send` and `recv` may transfer fewer bytes than requested. An attempt
/// that does not complete within the endpoint's own deadline fails with an
/// error for which [`is_timeout`] returns true. `recv` returning `Ok(0)`
/// means the peer closed its side.
pub trait Transport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T> Transport for T
where
    T: Read + Write,
{
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// Whether an I/O error is a deadline expiry rather than a failure.
///
/// Sockets with `set_read_timeout`/`set_write_timeout` report expiry as
/// `WouldBlock` on Unix and `TimedOut` on Windows.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
