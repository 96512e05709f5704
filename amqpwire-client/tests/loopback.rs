//! Blocking framer over real loopback sockets.

use amqpwire_client::{AbortHandle, Deadline, Framer, FramerConfig, FramerError};
use amqpwire_protocol::{Frame, FrameFlags, ProtocolError, MAX_PAYLOAD};
use proptest::prelude::*;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

fn socket_pair(config: &FramerConfig) -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    config.configure_tcp(&client).unwrap();
    config.configure_tcp(&server).unwrap();
    (client, server)
}

fn short_timeouts() -> FramerConfig {
    FramerConfig {
        read_timeout_ms: Some(20),
        write_timeout_ms: Some(20),
        ..Default::default()
    }
}

#[test]
fn test_handshake() {
    let (client, server) = socket_pair(&FramerConfig::default());
    let mut client = Framer::new(client);
    let mut server = Framer::new(server);

    client.write_header(1, 10).unwrap();
    let header = server.read_header().unwrap();
    assert_eq!(&header.literal, b"AMQP");
    assert_eq!(
        (header.class, header.instance, header.major, header.minor),
        (1, 1, 1, 10)
    );
}

#[test]
fn test_frames_arrive_in_order() {
    let (client, server) = socket_pair(&FramerConfig::default());
    let frames: Vec<Frame> = (0u16..50)
        .map(|i| {
            let flags = FrameFlags::from_bits((i % 16) as u8);
            Frame::new(flags, (i % 4) as u8, (i % 16) as u8, i, vec![i as u8; i as usize * 31])
                .unwrap()
        })
        .collect();

    let sent = frames.clone();
    let writer = thread::spawn(move || {
        let mut framer = Framer::new(client);
        for frame in &sent {
            framer.write_frame(frame).unwrap();
        }
    });

    let mut reader = Framer::new(server);
    for expected in &frames {
        assert_eq!(&reader.read_frame().unwrap(), expected);
    }
    writer.join().unwrap();
}

#[test]
fn test_track_keeps_low_bits() {
    let (client, server) = socket_pair(&FramerConfig::default());
    let mut client = Framer::new(client);
    let mut server = Framer::new(server);

    let frame = Frame::new(FrameFlags::complete(), 1, 20, 3, &b"x"[..]).unwrap();
    client.write_frame(&frame).unwrap();
    assert_eq!(server.read_frame().unwrap().track(), 4);
}

#[test]
fn test_max_payload_frame() {
    let (client, server) = socket_pair(&FramerConfig::default());
    let payload: Vec<u8> = (0..MAX_PAYLOAD).map(|i| (i % 251) as u8).collect();
    let frame = Frame::new(FrameFlags::complete(), 3, 0, 1, payload).unwrap();

    let sent = frame.clone();
    let writer = thread::spawn(move || Framer::new(client).write_frame(&sent).unwrap());

    let received = Framer::new(server).read_frame().unwrap();
    writer.join().unwrap();
    assert_eq!(received, frame);
}

#[test]
fn test_oversized_payload_rejected_before_io() {
    let result = Frame::new(FrameFlags::complete(), 3, 0, 1, vec![0u8; MAX_PAYLOAD + 1]);
    assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
}

#[test]
fn test_peer_close_during_read_frame() {
    let (client, server) = socket_pair(&FramerConfig::default());
    let mut client = Framer::new(client);
    client.write(&[0x0f, 0x01, 0x00]).unwrap();
    drop(client);

    let mut server = Framer::new(server);
    assert!(matches!(
        server.read_frame(),
        Err(FramerError::ConnectionClosed)
    ));
    assert!(server.read_frame().unwrap_err().is_closed());
}

#[test]
fn test_abort_handle_from_another_thread() {
    let (_client, server) = socket_pair(&short_timeouts());
    let handle = AbortHandle::new();
    let mut reader = Framer::with_abort(server, handle.clone());

    let remote = handle.clone();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        remote.abort();
    });

    let started = Instant::now();
    assert!(reader.read_frame().unwrap_err().is_closed());
    assert!(started.elapsed() >= Duration::from_millis(60));
    aborter.join().unwrap();
}

#[test]
fn test_deadline_ends_blocked_read() {
    let (_client, server) = socket_pair(&short_timeouts());
    let deadline = Deadline::after(Duration::from_millis(80)).unwrap();
    let mut reader = Framer::new(server).abort_with(deadline);

    let started = Instant::now();
    assert!(reader.read_header().unwrap_err().is_closed());
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[test]
fn test_timeouts_are_transparent() {
    let (client, server) = socket_pair(&short_timeouts());
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        Framer::new(client).write_header(0, 10).unwrap();
    });

    // Several read timeouts elapse before the header arrives.
    let header = Framer::new(server).read_header().unwrap();
    assert_eq!(header.version(), (0, 10));
    writer.join().unwrap();
}

#[test]
fn test_split_reader_and_writer() {
    let (client, server) = socket_pair(&FramerConfig::default());
    let (mut client_rx, mut client_tx) = Framer::new(client).try_split().unwrap();
    let mut server = Framer::new(server);

    let echo = thread::spawn(move || {
        let frame = server.read_frame().unwrap();
        server.write_frame(&frame).unwrap();
    });

    let frame = Frame::new(FrameFlags::complete(), 1, 2, 9, &b"echo"[..]).unwrap();
    client_tx.write_frame(&frame).unwrap();
    assert_eq!(client_rx.read_frame().unwrap(), frame);
    echo.join().unwrap();
}

#[test]
fn test_connect_applies_config() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = short_timeouts();
    let framer = Framer::connect(listener.local_addr().unwrap(), &config).unwrap();
    assert_eq!(
        framer.get_ref().read_timeout().unwrap(),
        Some(Duration::from_millis(20))
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_frame_survives_the_wire(
        flags in 0u8..16,
        frame_type in any::<u8>(),
        track in any::<u8>(),
        channel in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
    ) {
        let (client, server) = socket_pair(&FramerConfig::default());
        let frame = Frame::new(FrameFlags::from_bits(flags), frame_type, track, channel, payload)
            .unwrap();

        let sent = frame.clone();
        let writer = thread::spawn(move || Framer::new(client).write_frame(&sent).unwrap());
        let received = Framer::new(server).read_frame().unwrap();
        writer.join().unwrap();

        prop_assert_eq!(received.flags(), frame.flags());
        prop_assert_eq!(received.frame_type(), frame.frame_type());
        prop_assert_eq!(received.channel(), frame.channel());
        prop_assert_eq!(received.track(), frame.track() & 0x0F);
        prop_assert_eq!(received.payload(), frame.payload());
    }
}
