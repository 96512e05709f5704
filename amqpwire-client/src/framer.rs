//! Blocking framer.

use crate::abort::{Abort, NeverAbort};
use crate::config::FramerConfig;
use crate::error::FramerError;
use crate::transport::{is_timeout, Transport};
use amqpwire_protocol::{
    Frame, FrameHeader, ProtocolHeader, FRAME_HEADER_SIZE, PROTOCOL_HEADER_SIZE,
};
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};

/// Reads and writes frames on one connected stream.
///
/// Every operation blocks until it completes or the connection is judged
/// closed. Timeouts reported by the stream are retried until the abort
/// predicate says otherwise. Once an operation has returned
/// [`FramerError::ConnectionClosed`], every later call returns it again
/// without touching the stream.
///
/// One instance must not be shared between concurrent readers or writers.
/// Use [`Framer::try_split`] to get independent read and write sides.
#[derive(Debug)]
pub struct Framer<S, A = NeverAbort> {
    stream: S,
    abort: A,
    closed: bool,
}

impl<S: Transport> Framer<S> {
    /// Wraps a connected stream. Timeouts are retried forever.
    pub fn new(stream: S) -> Self {
        Self::with_abort(stream, NeverAbort)
    }
}

impl Framer<TcpStream> {
    /// Connects and applies the socket options from `config`.
    pub fn connect(addr: impl ToSocketAddrs, config: &FramerConfig) -> Result<Self, FramerError> {
        let stream = TcpStream::connect(addr)?;
        config.configure_tcp(&stream)?;
        if let Ok(peer) = stream.peer_addr() {
            tracing::debug!("Framer connected to {}", peer);
        }
        Ok(Self::new(stream))
    }
}

impl<A: Abort + Clone> Framer<TcpStream, A> {
    /// Splits into a read side and a write side over cloned socket handles.
    ///
    /// Both sides poll clones of the same abort predicate but track closure
    /// independently.
    pub fn try_split(self) -> Result<(Self, Self), FramerError> {
        let writer = Framer {
            stream: self.stream.try_clone()?,
            abort: self.abort.clone(),
            closed: self.closed,
        };
        Ok((self, writer))
    }
}

impl<S: Transport, A: Abort> Framer<S, A> {
    /// Wraps a connected stream with a cancellation predicate.
    pub fn with_abort(stream: S, abort: A) -> Self {
        Self {
            stream,
            abort,
            closed: false,
        }
    }

    /// Replaces the cancellation predicate.
    pub fn abort_with<B: Abort>(self, abort: B) -> Framer<S, B> {
        Framer {
            stream: self.stream,
            abort,
            closed: self.closed,
        }
    }

    /// Polls the cancellation predicate.
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

    /// Sends the protocol handshake for `major.minor`.
    pub fn write_header(&mut self, major: u8, minor: u8) -> Result<(), FramerError> {
        let header = ProtocolHeader::new(major, minor);
        tracing::debug!("Writing protocol header {}", header);
        self.write(&header.to_bytes())
    }

    /// Receives the peer's handshake. The literal and version are not checked.
    pub fn read_header(&mut self) -> Result<ProtocolHeader, FramerError> {
        let mut buf = [0u8; PROTOCOL_HEADER_SIZE];
        self.read_into(&mut buf)?;
        let header = ProtocolHeader::decode(&buf);
        tracing::debug!("Read protocol header {}", header);
        Ok(header)
    }

    /// Writes one frame: the 8-byte header, then the payload.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), FramerError> {
        let header = FrameHeader::for_frame(frame);
        tracing::trace!(
            "Writing frame type={} channel={} track={} size={}",
            header.frame_type,
            header.channel,
            header.track,
            header.size
        );
        self.write(&header.to_bytes())?;
        let result = self.write(frame.payload());
        self.within_frame(result)
    }

    /// Reads one frame.
    ///
    /// A declared size smaller than the header leaves the stream unaligned,
    /// so it closes the framer and returns a protocol error.
    pub fn read_frame(&mut self) -> Result<Frame, FramerError> {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        self.read_into(&mut buf)?;
        let header = FrameHeader::decode(&buf);

        let payload_len = match header.payload_len() {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!("Dropping connection: {}", e);
                self.closed = true;
                return Err(e.into());
            }
        };

        let result = self.read(payload_len);
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

    /// Sends all of `buf`, retrying partial sends and timeouts.
    ///
    /// A transport error before the first byte is returned as is; once part
    /// of `buf` is out the framer closes.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), FramerError> {
        self.ensure_open()?;

        let mut remaining = buf;
        while !remaining.is_empty() {
            match self.stream.send(remaining) {
                Ok(0) => {
                    tracing::debug!("Stream accepted no bytes, treating as closed");
                    return Err(self.close());
                }
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
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
                Err(e) if remaining.len() == buf.len() => return Err(FramerError::Io(e)),
                Err(e) => {
                    tracing::debug!(
                        "Transport error after {} of {} bytes sent: {}",
                        buf.len() - remaining.len(),
                        buf.len(),
                        e
                    );
                    return Err(self.close());
                }
            }
        }

        Ok(())
    }

    /// Receives exactly `n` bytes.
    pub fn read(&mut self, n: usize) -> Result<Bytes, FramerError> {
        let mut buf = BytesMut::zeroed(n);
        self.read_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Fills `buf` completely.
    ///
    /// Partial data is discarded when the peer closes or the transport fails
    /// mid-read; a transport error before the first byte is returned as is.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), FramerError> {
        self.ensure_open()?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.recv(&mut buf[filled..]) {
                Ok(0) => {
                    tracing::debug!(
                        "Peer closed connection ({} of {} bytes received)",
                        filled,
                        buf.len()
                    );
                    return Err(self.close());
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
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
                Err(e) if filled == 0 => return Err(FramerError::Io(e)),
                Err(e) => {
                    tracing::debug!("Transport error after {} bytes: {}", filled, e);
                    return Err(self.close());
                }
            }
        }

        Ok(())
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

    /// Once a frame header has crossed the wire, any transport error leaves
    /// the stream unaligned and closes the framer.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortHandle;
    use amqpwire_protocol::{FrameFlags, ProtocolError, MAX_PAYLOAD};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::rc::Rc;

    /// One scripted outcome of a send or recv attempt.
    enum Step {
        /// Accept at most this many bytes (send) or deliver these bytes (recv).
        Send(usize),
        Recv(Vec<u8>),
        Timeout,
        Eof,
        Fail(io::ErrorKind),
    }

    /// Stream that replays scripted steps and records what was sent.
    #[derive(Default)]
    struct ScriptedStream {
        sends: VecDeque<Step>,
        recvs: VecDeque<Step>,
        sent: Vec<u8>,
        send_calls: usize,
        recv_calls: usize,
    }

    impl ScriptedStream {
        fn with_sends(steps: Vec<Step>) -> Self {
            Self {
                sends: steps.into(),
                ..Default::default()
            }
        }

        fn with_recvs(steps: Vec<Step>) -> Self {
            Self {
                recvs: steps.into(),
                ..Default::default()
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.send_calls += 1;
            match self.sends.pop_front() {
                None => {
                    self.sent.extend_from_slice(buf);
                    Ok(buf.len())
                }
                Some(Step::Send(max)) => {
                    let n = max.min(buf.len());
                    self.sent.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Some(Step::Timeout) => Err(io::ErrorKind::WouldBlock.into()),
                Some(Step::Fail(kind)) => Err(kind.into()),
                Some(Step::Eof) => Ok(0),
                Some(Step::Recv(_)) => panic!("recv step in send script"),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.recv_calls += 1;
            match self.recvs.pop_front() {
                None | Some(Step::Eof) => Ok(0),
                Some(Step::Recv(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        data.drain(..n);
                        self.recvs.push_front(Step::Recv(data));
                    }
                    Ok(n)
                }
                Some(Step::Timeout) => Err(io::ErrorKind::TimedOut.into()),
                Some(Step::Fail(kind)) => Err(kind.into()),
                Some(Step::Send(_)) => panic!("send step in recv script"),
            }
        }
    }

    fn frame_bytes(frame: &Frame) -> Vec<u8> {
        let mut out = FrameHeader::for_frame(frame).to_bytes().to_vec();
        out.extend_from_slice(frame.payload());
        out
    }

    /// Abort predicate that flips to true after `n` polls and counts polls.
    fn abort_after(n: usize) -> (impl Fn() -> bool, Rc<Cell<usize>>) {
        let polls = Rc::new(Cell::new(0));
        let counter = polls.clone();
        let abort = move || {
            counter.set(counter.get() + 1);
            counter.get() > n
        };
        (abort, polls)
    }

    #[test]
    fn test_write_header_layout() {
        let mut framer = Framer::new(ScriptedStream::default());
        framer.write_header(0, 10).unwrap();
        assert_eq!(framer.get_ref().sent, b"AMQP\x01\x01\x00\x0a");
    }

    #[test]
    fn test_read_header_returns_raw_fields() {
        let stream = ScriptedStream::with_recvs(vec![Step::Recv(b"XXXX\x02\x03\x04\x05".to_vec())]);
        let mut framer = Framer::new(stream);
        let header = framer.read_header().unwrap();
        assert_eq!(&header.literal, b"XXXX");
        assert_eq!((header.class, header.instance), (2, 3));
        assert_eq!(header.version(), (4, 5));
    }

    #[test]
    fn test_write_frame_layout() {
        let frame = Frame::new(FrameFlags::complete(), 1, 0x13, 0x0203, &b"hello"[..]).unwrap();
        let mut framer = Framer::new(ScriptedStream::default());
        framer.write_frame(&frame).unwrap();
        assert_eq!(
            framer.get_ref().sent,
            b"\x0f\x01\x00\x0d\x00\x03\x02\x03hello".to_vec()
        );
    }

    #[test]
    fn test_partial_writes_resume_with_tail() {
        let stream = ScriptedStream::with_sends(vec![Step::Send(3), Step::Send(1), Step::Send(2)]);
        let mut framer = Framer::new(stream);
        framer.write(b"0123456789").unwrap();

        let stream = framer.into_inner();
        assert_eq!(stream.sent, b"0123456789");
        assert_eq!(stream.send_calls, 4);
    }

    #[test]
    fn test_partial_reads_accumulate() {
        let frame = Frame::new(FrameFlags::new(), 3, 1, 9, &b"payload"[..]).unwrap();
        let bytes = frame_bytes(&frame);
        let steps = bytes.chunks(3).map(|c| Step::Recv(c.to_vec())).collect();
        let mut framer = Framer::new(ScriptedStream::with_recvs(steps));
        assert_eq!(framer.read_frame().unwrap(), frame);
    }

    #[test]
    fn test_write_timeouts_retry_until_sent() {
        let stream = ScriptedStream::with_sends(vec![
            Step::Timeout,
            Step::Send(2),
            Step::Timeout,
            Step::Timeout,
        ]);
        let (abort, polls) = abort_after(usize::MAX);
        let mut framer = Framer::with_abort(stream, abort);
        framer.write(b"abcd").unwrap();

        assert_eq!(polls.get(), 3);
        assert_eq!(framer.get_ref().sent, b"abcd");
    }

    #[test]
    fn test_write_abort_stops_on_first_retry() {
        let stream = ScriptedStream::with_sends(vec![
            Step::Send(1),
            Step::Timeout,
            Step::Timeout,
            Step::Timeout,
        ]);
        let (abort, polls) = abort_after(1);
        let mut framer = Framer::with_abort(stream, abort);

        let err = framer.write(b"abcd").unwrap_err();
        assert!(err.is_closed());
        assert_eq!(polls.get(), 2);

        let stream = framer.get_ref();
        assert_eq!(stream.sent, b"a");
        assert_eq!(stream.send_calls, 3);
        assert_eq!(stream.sends.len(), 1);
    }

    #[test]
    fn test_read_timeouts_retry_until_received() {
        let stream = ScriptedStream::with_recvs(vec![
            Step::Timeout,
            Step::Recv(b"AM".to_vec()),
            Step::Timeout,
            Step::Recv(b"QP\x01\x01\x00\x0a".to_vec()),
        ]);
        let (abort, polls) = abort_after(usize::MAX);
        let mut framer = Framer::with_abort(stream, abort);

        let header = framer.read_header().unwrap();
        assert_eq!(header, ProtocolHeader::new(0, 10));
        assert_eq!(polls.get(), 2);
    }

    #[test]
    fn test_read_abort_stops_on_first_retry() {
        let stream = ScriptedStream::with_recvs(vec![
            Step::Recv(vec![0x0f, 0x01]),
            Step::Timeout,
            Step::Timeout,
            Step::Recv(vec![0; 6]),
        ]);
        let handle = AbortHandle::new();
        let mut framer = Framer::with_abort(stream, handle.clone());

        // Flip the handle before the first timeout is observed.
        handle.abort();
        let err = framer.read_frame().unwrap_err();
        assert!(err.is_closed());

        let stream = framer.get_ref();
        assert_eq!(stream.recv_calls, 2);
        assert_eq!(stream.recvs.len(), 2);
    }

    #[test]
    fn test_zero_length_receive_closes() {
        let stream = ScriptedStream::with_recvs(vec![Step::Recv(vec![0x0f, 0x01, 0x00]), Step::Eof]);
        let mut framer = Framer::new(stream);
        assert!(matches!(
            framer.read_frame(),
            Err(FramerError::ConnectionClosed)
        ));
        assert!(framer.is_closed());
    }

    #[test]
    fn test_eof_during_payload_closes() {
        let frame = Frame::new(FrameFlags::new(), 3, 0, 1, &b"0123456789"[..]).unwrap();
        let bytes = frame_bytes(&frame);
        let stream = ScriptedStream::with_recvs(vec![Step::Recv(bytes[..12].to_vec()), Step::Eof]);
        let mut framer = Framer::new(stream);
        assert!(framer.read_frame().unwrap_err().is_closed());
    }

    #[test]
    fn test_error_before_data_propagates() {
        let stream = ScriptedStream::with_recvs(vec![Step::Fail(io::ErrorKind::ConnectionReset)]);
        let mut framer = Framer::new(stream);

        match framer.read_frame() {
            Err(FramerError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected I/O error, got {:?}", other),
        }
        assert!(!framer.is_closed());
    }

    #[test]
    fn test_error_after_partial_data_closes() {
        let stream = ScriptedStream::with_recvs(vec![
            Step::Recv(vec![0x0f, 0x01, 0x00]),
            Step::Fail(io::ErrorKind::ConnectionReset),
        ]);
        let mut framer = Framer::new(stream);
        assert!(framer.read_frame().unwrap_err().is_closed());
        assert!(framer.is_closed());
    }

    #[test]
    fn test_error_after_frame_header_closes() {
        let header = FrameHeader {
            flags: FrameFlags::complete(),
            frame_type: 1,
            size: 12,
            track: 0,
            channel: 1,
        };
        let stream = ScriptedStream::with_recvs(vec![
            Step::Recv(header.to_bytes().to_vec()),
            Step::Fail(io::ErrorKind::ConnectionReset),
            Step::Recv(b"WXYZ".to_vec()),
            Step::Recv(header.to_bytes().to_vec()),
        ]);
        let mut framer = Framer::new(stream);

        assert!(framer.read_frame().unwrap_err().is_closed());
        assert!(framer.is_closed());
        let calls = framer.get_ref().recv_calls;
        assert!(framer.read_frame().unwrap_err().is_closed());
        assert_eq!(framer.get_ref().recv_calls, calls);
    }

    #[test]
    fn test_write_error_after_frame_header_closes() {
        let stream = ScriptedStream::with_sends(vec![
            Step::Send(FRAME_HEADER_SIZE),
            Step::Fail(io::ErrorKind::ConnectionReset),
        ]);
        let mut framer = Framer::new(stream);
        let frame = Frame::new(FrameFlags::complete(), 3, 0, 1, &b"body"[..]).unwrap();

        assert!(framer.write_frame(&frame).unwrap_err().is_closed());
        assert!(framer.is_closed());
        assert_eq!(framer.get_ref().sent.len(), FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_write_error_after_partial_send_closes() {
        let stream = ScriptedStream::with_sends(vec![
            Step::Send(3),
            Step::Fail(io::ErrorKind::BrokenPipe),
        ]);
        let mut framer = Framer::new(stream);
        assert!(framer.write(b"0123456789").unwrap_err().is_closed());
        assert_eq!(framer.get_ref().sent, b"012");
    }

    #[test]
    fn test_write_error_propagates() {
        let stream = ScriptedStream::with_sends(vec![Step::Fail(io::ErrorKind::BrokenPipe)]);
        let mut framer = Framer::new(stream);
        match framer.write_header(0, 10) {
            Err(FramerError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected I/O error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_send_closes() {
        let stream = ScriptedStream::with_sends(vec![Step::Eof]);
        let mut framer = Framer::new(stream);
        assert!(framer.write(b"x").unwrap_err().is_closed());
    }

    #[test]
    fn test_interrupted_is_retried() {
        let stream = ScriptedStream::with_recvs(vec![
            Step::Fail(io::ErrorKind::Interrupted),
            Step::Recv(b"AMQP\x01\x01\x00\x0a".to_vec()),
        ]);
        let mut framer = Framer::new(stream);
        assert_eq!(framer.read_header().unwrap().version(), (0, 10));
    }

    #[test]
    fn test_closed_framer_stays_closed() {
        let mut framer = Framer::new(ScriptedStream::with_recvs(vec![Step::Eof]));
        assert!(framer.read_header().unwrap_err().is_closed());

        assert!(framer.read_frame().unwrap_err().is_closed());
        assert!(framer.write_header(0, 10).unwrap_err().is_closed());
        assert!(framer.read(0).unwrap_err().is_closed());

        let stream = framer.get_ref();
        assert_eq!(stream.recv_calls, 1);
        assert_eq!(stream.send_calls, 0);
    }

    #[test]
    fn test_undersized_frame_is_rejected() {
        let stream = ScriptedStream::with_recvs(vec![Step::Recv(vec![0, 0, 0, 4, 0, 0, 0, 0])]);
        let mut framer = Framer::new(stream);
        assert!(matches!(
            framer.read_frame(),
            Err(FramerError::Protocol(ProtocolError::InvalidFrameSize { size: 4 }))
        ));
        assert!(framer.is_closed());
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = Frame::new(FrameFlags::complete(), 0, 0, 0, Bytes::new()).unwrap();
        let stream = ScriptedStream::with_recvs(vec![Step::Recv(frame_bytes(&frame))]);
        let mut framer = Framer::new(stream);
        assert_eq!(framer.read_frame().unwrap(), frame);
    }

    #[test]
    fn test_oversized_frame_never_reaches_the_wire() {
        let framer = Framer::new(ScriptedStream::default());
        let result = Frame::new(FrameFlags::new(), 3, 0, 0, vec![0u8; MAX_PAYLOAD + 1]);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
        assert_eq!(framer.get_ref().send_calls, 0);
    }
}
