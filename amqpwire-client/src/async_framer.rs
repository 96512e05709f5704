//! Async framer for tokio streams.
//!
//! Mirrors [`Framer`](crate::Framer): the same handshake and frame encoding,
//! the same closed-state rules. Instead of socket timeouts, each I/O attempt
//! is bounded by `io_timeout`; when an attempt times out the abort predicate
//! is polled and the attempt is retried unless it says to give up.

use crate::abort::{Abort, NeverAbort};
use crate::config::FramerConfig;
use crate::error::FramerError;
use crate::transport::is_timeout;
use amqpwire_protocol::{
    Frame, FrameHeader, ProtocolHeader, FRAME_HEADER_SIZE, PROTOCOL_HEADER_SIZE,
};
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Outcome of one bounded I/O attempt.
enum Attempt<T> {
    Done(io::Result<T>),
    TimedOut,
}

async fn attempt<F, T>(io_timeout: Option<Duration>, fut: F) -> Attempt<T>
where
    F: Future<Output = io::Result<T>>,
{
    match io_timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Attempt::Done(result),
            Err(_) => Attempt::TimedOut,
        },
        None => Attempt::Done(fut.await),
    }
}

/// Reads and writes frames on one tokio stream.
///
/// Read operations need `S: AsyncRead`, write operations `S: AsyncWrite`, so
/// the halves returned by [`AsyncFramer::split`] each expose one direction.
#[derive(Debug)]
pub struct AsyncFramer<S, A = NeverAbort> {
    stream: S,
    abort: A,
    io_timeout: Option<Duration>,
    closed: bool,
}

impl<S> AsyncFramer<S> {
    /// Wraps a connected stream with no attempt timeout and no abort predicate.
    pub fn new(stream: S) -> Self {
        Self::with_abort(stream, NeverAbort)
    }

    /// Wraps a connected stream using the config's attempt timeout.
    pub fn from_config(stream: S, config: &FramerConfig) -> Self {
        Self::new(stream).with_io_timeout(config.io_timeout())
    }
}

impl<S, A: Abort> AsyncFramer<S, A> {
    pub fn with_abort(stream: S, abort: A) -> Self {
        Self {
            stream,
            abort,
            io_timeout: None,
            closed: false,
        }
    }

    /// Bounds each read or write attempt. `None` waits without limit.
    pub fn with_io_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Replaces the cancellation predicate.
    pub fn abort_with<B: Abort>(self, abort: B) -> AsyncFramer<S, B> {
        AsyncFramer {
            stream: self.stream,
            abort,
            io_timeout: self.io_timeout,
            closed: self.closed,
        }
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    pub fn aborted(&self) -> bool {
        self.abort.aborted()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn ensure_open(&self) -> Result<(), FramerError> {
        if self.closed {
            return Err(FramerError::ConnectionClosed);
        }
        Ok(())
    }

    fn close(&mut self) -> FramerError {
        self.closed = true;
        FramerError::ConnectionClosed
    }

    /// A transport error after the frame header leaves the stream unaligned.
    fn within_frame<T>(&mut self, result: Result<T, FramerError>) -> Result<T, FramerError> {
        match result {
            Err(FramerError::Io(e)) => {
                tracing::debug!("Transport error inside a frame: {}", e);
                Err(self.close())
            }
            other => other,
        }
    }
}

impl<S, A> AsyncFramer<S, A>
where
    S: AsyncRead + AsyncWrite,
    A: Abort + Clone,
{
    /// Splits into independent read and write framers.
    pub fn split(self) -> (AsyncFramer<ReadHalf<S>, A>, AsyncFramer<WriteHalf<S>, A>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        let reader = AsyncFramer {
            stream: read_half,
            abort: self.abort.clone(),
            io_timeout: self.io_timeout,
            closed: self.closed,
        };
        let writer = AsyncFramer {
            stream: write_half,
            abort: self.abort,
            io_timeout: self.io_timeout,
            closed: self.closed,
        };
        (reader, writer)
    }
}

impl<S: AsyncWrite + Unpin, A: Abort> AsyncFramer<S, A> {
    /// Sends the protocol handshake for `major.minor`.
    pub async fn write_header(&mut self, major: u8, minor: u8) -> Result<(), FramerError> {
        let header = ProtocolHeader::new(major, minor);
        tracing::debug!("Writing protocol header {}", header);
        self.write(&header.to_bytes()).await?;
        self.flush().await
    }

    /// Writes one frame and flushes the stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FramerError> {
        let header = FrameHeader::for_frame(frame);
        tracing::trace!(
            "Writing frame type={} channel={} track={} size={}",
            header.frame_type,
            header.channel,
            header.track,
            header.size
        );
        self.write(&header.to_bytes()).await?;
        let result = self.write(frame.payload()).await;
        self.within_frame(result)?;
        self.flush().await
    }

    /// Sends all of `buf`, retrying partial writes and timed-out attempts.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), FramerError> {
        self.ensure_open()?;

        let mut remaining = buf;
        while !remaining.is_empty() {
            match attempt(self.io_timeout, self.stream.write(remaining)).await {
                Attempt::Done(Ok(0)) => {
                    tracing::debug!("Stream accepted no bytes, treating as closed");
                    return Err(self.close());
                }
                Attempt::Done(Ok(n)) => remaining = &remaining[n..],
                Attempt::Done(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Attempt::Done(Err(e)) if !is_timeout(&e) => {
                    if remaining.len() == buf.len() {
                        return Err(FramerError::Io(e));
                    }
                    tracing::debug!(
                        "Transport error after {} of {} bytes sent: {}",
                        buf.len() - remaining.len(),
                        buf.len(),
                        e
                    );
                    return Err(self.close());
                }
                Attempt::Done(Err(_)) | Attempt::TimedOut => {
                    if self.abort.aborted() {
                        tracing::debug!(
                            "Write aborted with {} of {} bytes unsent",
                            remaining.len(),
                            buf.len()
                        );
                        return Err(self.close());
                    }
                    tracing::trace!("Send timed out, retrying");
                }
            }
        }

        Ok(())
    }

    /// Flushes written bytes under the same timeout and abort rules as
    /// `write`. The bytes are already handed over, so a failure closes.
    async fn flush(&mut self) -> Result<(), FramerError> {
        loop {
            match attempt(self.io_timeout, self.stream.flush()).await {
                Attempt::Done(Ok(())) => return Ok(()),
                Attempt::Done(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Attempt::Done(Err(e)) if !is_timeout(&e) => {
                    tracing::debug!("Flush failed: {}", e);
                    return Err(self.close());
                }
                Attempt::Done(Err(_)) | Attempt::TimedOut => {
                    if self.abort.aborted() {
                        tracing::debug!("Flush aborted");
                        return Err(self.close());
                    }
                    tracing::trace!("Flush timed out, retrying");
                }
            }
        }
    }
}

impl<S: AsyncRead + Unpin, A: Abort> AsyncFramer<S, A> {
    /// Receives the peer's handshake. The literal and version are not checked.
    pub async fn read_header(&mut self) -> Result<ProtocolHeader, FramerError> {
        let mut buf = [0u8; PROTOCOL_HEADER_SIZE];
        self.read_into(&mut buf).await?;
        let header = ProtocolHeader::decode(&buf);
        tracing::debug!("Read protocol header {}", header);
        Ok(header)
    }

    /// Reads one frame.
    pub async fn read_frame(&mut self) -> Result<Frame, FramerError> {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        self.read_into(&mut buf).await?;
        let header = FrameHeader::decode(&buf);

        let payload_len = match header.payload_len() {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!("Dropping connection: {}", e);
                self.closed = true;
                return Err(e.into());
            }
        };

        let result = self.read(payload_len).await;
        let payload = self.within_frame(result)?;
        tracing::trace!(
            "Read frame type={} channel={} track={} size={}",
            header.frame_type,
            header.channel,
            header.track,
            header.size
        );
        Ok(header.into_frame(payload)?)
    }

    /// Receives exactly `n` bytes.
    pub async fn read(&mut self, n: usize) -> Result<Bytes, FramerError> {
        let mut buf = BytesMut::zeroed(n);
        self.read_into(&mut buf).await?;
        Ok(buf.freeze())
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> Result<(), FramerError> {
        self.ensure_open()?;

        let mut filled = 0;
        while filled < buf.len() {
            match attempt(self.io_timeout, self.stream.read(&mut buf[filled..])).await {
                Attempt::Done(Ok(0)) => {
                    tracing::debug!(
                        "Peer closed connection ({} of {} bytes received)",
                        filled,
                        buf.len()
                    );
                    return Err(self.close());
                }
                Attempt::Done(Ok(n)) => filled += n,
                Attempt::Done(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Attempt::Done(Err(e)) if !is_timeout(&e) => {
                    if filled == 0 {
                        return Err(FramerError::Io(e));
                    }
                    tracing::debug!("Transport error after {} bytes: {}", filled, e);
                    return Err(self.close());
                }
                Attempt::Done(Err(_)) | Attempt::TimedOut => {
                    if self.abort.aborted() {
                        tracing::debug!(
                            "Read aborted with {} of {} bytes received",
                            filled,
                            buf.len()
                        );
                        return Err(self.close());
                    }
                    tracing::trace!("Receive timed out, retrying");
                }
            }
        }

        Ok(())
    }
}
