use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use wharf_net::{Handle, Network, NetworkConfig, NetworkEvent, SocketState, WRITE_BUFFER_SIZE};
use wharf_stream::{SeekMode, Stream};

fn runtime() -> Arc<Network> {
    Arc::new(Network::new(NetworkConfig::default()))
}

fn listener(net: &Arc<Network>) -> (Handle, SocketAddr) {
    let listener = net.tcp_create().unwrap();
    assert!(net.bind(listener, SocketAddr::from((Ipv4Addr::LOCALHOST, 0))));
    assert!(net.listen(listener));
    (listener, net.local_address(listener).unwrap())
}

/// Listener + connected client/accepted pair, both sides blocking so the
/// byte-level assertions are deterministic.
fn blocking_pair(net: &Arc<Network>) -> (Handle, Handle, Handle) {
    let (listener, addr) = listener(net);
    let client = net.tcp_create().unwrap();
    assert!(net.connect(client, addr, Some(Duration::from_secs(1))));
    let accepted = net.accept(listener, Some(Duration::from_secs(1))).unwrap();
    net.set_blocking(client, true);
    net.set_blocking(accepted, true);
    (listener, client, accepted)
}

#[test]
fn listen_accept_connect_roundtrip() {
    let net = runtime();
    let (listener, addr) = listener(&net);
    assert_eq!(net.state(listener), SocketState::Listening);
    assert!(net.local_address(listener).is_some());
    assert_eq!(net.remote_address(listener), None);

    let client = net.tcp_create().unwrap();
    assert!(net.connect(client, addr, Some(Duration::from_secs(1))));
    assert_eq!(net.state(client), SocketState::Connected);
    assert_eq!(net.remote_address(client), Some(addr));
    assert!(net.local_address(client).is_some());

    let accepted = net.accept(listener, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(net.state(accepted), SocketState::Connected);
    assert_eq!(net.remote_address(accepted), net.local_address(client));
    assert!(net.local_address(accepted).is_some());

    net.set_blocking(client, true);
    net.set_blocking(accepted, true);

    let mut client_stream = net.stream(client).unwrap();
    let mut accepted_stream = net.stream(accepted).unwrap();

    assert_eq!(client_stream.write(b"ABC"), 3);
    client_stream.flush();
    let mut buf = [0_u8; 3];
    assert_eq!(accepted_stream.read(&mut buf), 3);
    assert_eq!(&buf, b"ABC");

    assert_eq!(accepted_stream.write(b"XYZ"), 3);
    accepted_stream.flush();
    assert_eq!(client_stream.read(&mut buf), 3);
    assert_eq!(&buf, b"XYZ");

    net.destroy(accepted);
    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn connect_without_timeout_goes_through_connecting() {
    let net = runtime();
    let (listener, addr) = listener(&net);
    let client = net.tcp_create().unwrap();
    assert!(net.connect(client, addr, None));

    // poll_state picks the writable transition up without blocking
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let state = net.state(client);
        if state == SocketState::Connected {
            break;
        }
        assert_eq!(state, SocketState::Connecting);
        assert!(Instant::now() < deadline, "handshake never completed");
        thread::sleep(Duration::from_millis(1));
    }

    let accepted = net.accept(listener, Some(Duration::from_secs(1))).unwrap();
    net.destroy(accepted);
    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn accept_times_out_with_nothing_pending() {
    let net = runtime();
    let (listener, _) = listener(&net);
    assert_eq!(net.accept(listener, Some(Duration::from_millis(50))), None);
    // still listening afterwards
    assert_eq!(net.state(listener), SocketState::Listening);
    net.destroy(listener);
}

#[test]
fn connect_to_dead_port_fails() {
    let net = runtime();
    let (listener, addr) = listener(&net);
    net.destroy(listener);

    let client = net.tcp_create().unwrap();
    assert!(!net.connect(client, addr, Some(Duration::from_millis(500))));
    net.destroy(client);
}

#[test]
fn large_transfer_preserves_order_across_ring_wraps() {
    let net = runtime();
    let (listener, client, accepted) = blocking_pair(&net);

    // several times the ring capacity, so both buffers wrap repeatedly
    let payload: Vec<u8> = (0..200_000_usize).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let writer_net = Arc::clone(&net);
    let writer = thread::spawn(move || {
        let mut stream = writer_net.stream(client).unwrap();
        assert_eq!(stream.write(&payload), payload.len());
        stream.flush();
    });

    let mut stream = net.stream(accepted).unwrap();
    let mut received = vec![0_u8; expected.len()];
    let got = stream.read(&mut received);
    assert_eq!(got, expected.len());
    assert_eq!(received, expected);

    writer.join().unwrap();
    net.destroy(accepted);
    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn exact_capacity_write_flushes_synchronously() {
    let net = runtime();
    let (listener, client, accepted) = blocking_pair(&net);

    let payload = vec![7_u8; WRITE_BUFFER_SIZE];

    let reader_net = Arc::clone(&net);
    let reader = thread::spawn(move || {
        let mut stream = reader_net.stream(accepted).unwrap();
        let mut received = vec![0_u8; WRITE_BUFFER_SIZE];
        assert_eq!(stream.read(&mut received), WRITE_BUFFER_SIZE);
        assert!(received.iter().all(|b| *b == 7));
    });

    let mut stream = net.stream(client).unwrap();
    // filling the out-buffer to exactly capacity must drain it without an
    // explicit flush
    assert_eq!(stream.write(&payload), WRITE_BUFFER_SIZE);

    reader.join().unwrap();
    net.destroy(accepted);
    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn forward_seek_discards_and_tell_is_monotone() {
    let net = runtime();
    let (listener, client, accepted) = blocking_pair(&net);

    let mut writer = net.stream(client).unwrap();
    assert_eq!(writer.write(b"HELLOWORLD"), 10);
    writer.flush();

    let mut reader = net.stream(accepted).unwrap();
    assert!(!reader.seek(-1, SeekMode::Current));
    assert!(!reader.seek(0, SeekMode::Begin));
    assert_eq!(reader.tell(), 0);

    assert!(reader.seek(0, SeekMode::Current));
    assert_eq!(reader.tell(), 0);

    assert!(reader.seek(5, SeekMode::Current));
    assert_eq!(reader.tell(), 5);

    let mut buf = [0_u8; 5];
    assert_eq!(reader.read(&mut buf), 5);
    assert_eq!(&buf, b"WORLD");
    assert_eq!(reader.tell(), 10);

    net.destroy(accepted);
    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn graceful_remote_close_posts_one_hangup() {
    let net = runtime();
    let (listener, client, accepted) = blocking_pair(&net);

    let mut farewell = net.stream(accepted).unwrap();
    assert_eq!(farewell.write(b"BYE"), 3);
    farewell.flush();
    net.destroy(accepted);

    let mut reader = net.stream(client).unwrap();
    let mut buf = [0_u8; 3];
    assert_eq!(reader.read(&mut buf), 3);
    assert_eq!(&buf, b"BYE");

    // buffered bytes are gone; the next read observes the hangup
    assert_eq!(reader.read(&mut buf), 0);
    assert!(reader.eos());
    assert_eq!(net.state(client), SocketState::NotConnected);

    assert_eq!(net.poll_event(), Some(NetworkEvent::Hangup { handle: client }));
    assert_eq!(net.poll_event(), None);

    // the record survives the hangup until it is destroyed
    assert!(net.is_socket(client));
    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn polled_mode_suppresses_implicit_recv() {
    let net = runtime();
    let (listener, client, accepted) = blocking_pair(&net);
    // client goes back to non-blocking, poller-owned
    net.set_blocking(client, false);
    net.set_polled(client, true);

    let mut writer = net.stream(accepted).unwrap();
    assert_eq!(writer.write(b"PING"), 4);
    writer.flush();

    let mut reader = net.stream(client).unwrap();
    let deadline = Instant::now() + Duration::from_secs(1);
    while reader.available_read() < 4 {
        assert!(Instant::now() < deadline, "bytes never reached the kernel buffer");
        thread::sleep(Duration::from_millis(1));
    }

    // polled + non-blocking: the stream layer must not recv on its own
    let mut buf = [0_u8; 4];
    assert_eq!(reader.read(&mut buf), 0);

    net.set_polled(client, false);
    reader.buffer_read();
    assert_eq!(reader.read(&mut buf), 4);
    assert_eq!(&buf, b"PING");

    net.destroy(accepted);
    net.destroy(client);
    net.destroy(listener);
}

#[test]
fn streams_outlive_their_socket_safely() {
    let net = runtime();
    let (listener, client, accepted) = blocking_pair(&net);

    let mut stream = net.stream(client).unwrap();
    net.destroy(client);

    let mut buf = [0_u8; 8];
    assert_eq!(stream.read(&mut buf), 0);
    assert_eq!(stream.write(b"gone"), 0);
    assert!(stream.eos());
    assert_eq!(stream.available_read(), 0);
    assert_eq!(stream.tell(), 0);
    stream.flush();

    net.destroy(accepted);
    net.destroy(listener);
}

#[test]
fn destroying_the_listener_keeps_accepted_sockets_alive() {
    let net = runtime();
    let (listener, client, accepted) = blocking_pair(&net);
    net.destroy(listener);

    let mut writer = net.stream(client).unwrap();
    let mut reader = net.stream(accepted).unwrap();
    assert_eq!(writer.write(b"still here"), 10);
    writer.flush();
    let mut buf = [0_u8; 10];
    assert_eq!(reader.read(&mut buf), 10);
    assert_eq!(&buf, b"still here");

    net.destroy(client);
    net.destroy(accepted);
}
