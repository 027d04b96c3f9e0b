//! Black-box scenario tests driving the server over real loopback TCP
//! sockets from a background thread, the same shape `flux-network`'s
//! `tests/tcp_roundtrip.rs` and `tests/tcp_multi_client_backpressure.rs`
//! use, adapted from the end-to-end scenarios this protocol is specified
//! against (`original_source/test/exchange_server_tests.cpp`'s scenario
//! names: can_process_order, handles_client_disconnection,
//! handle_multiple_messages_in_match, can_list_orders, can_list_symbols).

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    thread,
    time::Duration,
};

use small_exchange::{Reactor, io::ControlWriter};

struct RunningServer {
    addr: SocketAddr,
    control: ControlWriter,
    handle: Option<thread::JoinHandle<()>>,
}

impl RunningServer {
    fn spawn() -> Self {
        let mut reactor = Reactor::bind(0).expect("reactor should bind to an ephemeral port");
        let bound = reactor.local_addr().expect("listener should report its local address");
        let addr = SocketAddr::from(([127, 0, 0, 1], bound.port()));
        let control = reactor.control_writer();

        let handle = thread::spawn(move || {
            reactor.run().expect("reactor should shut down cleanly");
        });

        // Give the reactor thread time to enter `mux.poll()` before tests
        // start connecting.
        thread::sleep(Duration::from_millis(50));

        Self { addr, control, handle: Some(handle) }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("client should connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.control.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Reads until at least `needle` has appeared in the accumulated bytes, or
/// the deadline expires.
fn read_until_contains(stream: &mut TcpStream, needle: &str) -> String {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 1024];
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let text = String::from_utf8_lossy(&buf);
        if text.contains(needle) {
            return text.into_owned();
        }
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for {needle:?}, got {text:?}");
        }
        match stream.read(&mut scratch) {
            Ok(0) => panic!("connection closed while waiting for {needle:?}, got {text:?}"),
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(err) => panic!("read error while waiting for {needle:?}: {err}"),
        }
    }
}

const BUY_ORDER_1234: &[u8] = b"order1234 BTCUSDT+001000010000\n";

#[test]
fn s1_happy_order_gets_acknowledged() {
    let server = RunningServer::spawn();
    let mut client = server.connect();

    client.write_all(b"idclient_id\n").unwrap();
    client.write_all(BUY_ORDER_1234).unwrap();

    let response = read_until_contains(&mut client, "ok\n");
    assert!(response.contains("ok\n"));
}

#[test]
fn s4_batched_input_runs_both_handlers_in_order() {
    let server = RunningServer::spawn();
    let mut client = server.connect();

    client.write_all(b"idclient_id\norder1234 BTCUSDT+001000010000\n").unwrap();

    let response = read_until_contains(&mut client, "ok\n");
    assert_eq!(response.matches("ok\n").count(), 1);
}

#[test]
fn s5_listorders_after_one_order() {
    let server = RunningServer::spawn();
    let mut client = server.connect();

    client.write_all(b"idclient_id\n").unwrap();
    client.write_all(BUY_ORDER_1234).unwrap();
    read_until_contains(&mut client, "ok\n");

    client.write_all(b"listorders\n").unwrap();
    let response = read_until_contains(&mut client, "1234 BTCUSDT+001000010000\n");
    assert!(response.contains("1234 BTCUSDT+001000010000\n"));
}

#[test]
fn s6_listsymbols_after_one_order() {
    let server = RunningServer::spawn();
    let mut client = server.connect();

    client.write_all(b"idclient_id\n").unwrap();
    client.write_all(BUY_ORDER_1234).unwrap();
    read_until_contains(&mut client, "ok\n");

    client.write_all(b"listsymbols\n").unwrap();
    let response = read_until_contains(&mut client, " BTCUSDT\n");
    assert!(response.contains(" BTCUSDT\n"));
}

#[test]
fn s2_disconnect_after_id_does_not_crash_the_server() {
    let server = RunningServer::spawn();
    {
        let mut client = server.connect();
        client.write_all(b"idbob\n").unwrap();
    }
    // The connection above is dropped here; give the reactor a moment to
    // process the peer-close event, then prove the server is still alive
    // by serving a fresh client.
    thread::sleep(Duration::from_millis(100));

    let mut other = server.connect();
    other.write_all(b"idclient_id\n").unwrap();
    other.write_all(BUY_ORDER_1234).unwrap();
    let response = read_until_contains(&mut other, "ok\n");
    assert!(response.contains("ok\n"));
}

#[test]
fn cancel_then_listorders_shows_no_resting_order() {
    let server = RunningServer::spawn();
    let mut client = server.connect();

    client.write_all(b"idclient_id\n").unwrap();
    client.write_all(BUY_ORDER_1234).unwrap();
    read_until_contains(&mut client, "ok\n");

    client.write_all(b"cancel1234\n").unwrap();
    read_until_contains(&mut client, "ok\n");

    client.write_all(b"listorders\n").unwrap();
    // Nothing further should arrive beyond the two "ok\n" already seen;
    // give the server a moment, then check no order line showed up.
    thread::sleep(Duration::from_millis(200));
    let mut buf = [0u8; 256];
    client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let n = match client.read(&mut buf) {
        Ok(n) => n,
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => 0,
        Err(err) => panic!("unexpected read error: {err}"),
    };
    assert!(!String::from_utf8_lossy(&buf[..n]).contains("BTCUSDT"));
}

#[test]
fn cancel_of_unknown_id_is_rejected() {
    let server = RunningServer::spawn();
    let mut client = server.connect();

    client.write_all(b"idclient_id\n").unwrap();
    client.write_all(b"cancel9999\n").unwrap();

    let response = read_until_contains(&mut client, "rejected\n");
    assert!(response.contains("rejected\n"));
}

#[test]
fn updating_order_with_mismatched_side_is_rejected() {
    let server = RunningServer::spawn();
    let mut client = server.connect();

    client.write_all(b"idclient_id\n").unwrap();
    client.write_all(BUY_ORDER_1234).unwrap();
    read_until_contains(&mut client, "ok\n");

    // Same id, opposite side: must be rejected, not treated as an update.
    client.write_all(b"order1234 BTCUSDT-001000010000\n").unwrap();
    let response = read_until_contains(&mut client, "rejected\n");
    assert!(response.contains("rejected\n"));
}
