//! E2E Suite 02: misbehaving peers.
//!
//! A peer that violates framing loses its connection with no reply; peers on
//! other connections must not notice. Every test asserts both halves: the
//! offender sees EOF, a bystander keeps working.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use bytekv::client::{connect, read_response, send_request};
use bytekv::cmd::Store;
use bytekv::config::MAX_MSG;
use bytekv::server::Server;
use bytekv::wire::{write_request, Value};

fn spawn_server() -> u16 {
    bytekv::verbose::set_notice_level(0);
    let mut server = Server::bind(0).expect("bind ephemeral port");
    let port = server.local_port();
    thread::spawn(move || {
        let mut store = Store::new();
        let _ = server.run(&mut store);
    });
    port
}

fn client_for(port: u16) -> TcpStream {
    let stream = connect("127.0.0.1", port).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream
}

/// The server must hang up without sending anything: the next read returns
/// EOF rather than bytes.
fn assert_dropped(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => {}
        Ok(n) => panic!("expected EOF, got {n} byte(s)"),
        Err(e) => panic!("expected EOF, got error {e}"),
    }
}

/// The server must still answer peers that behave.
fn assert_healthy(port: u16) {
    let mut c = client_for(port);
    send_request(&mut c, &[b"get", b"health"]).expect("send");
    assert_eq!(read_response(&mut c).unwrap(), Value::Nil);
}

#[test]
fn oversize_frame_closes_the_connection() {
    let port = spawn_server();
    let mut c = client_for(port);
    c.write_all(&((MAX_MSG as u32) + 1).to_le_bytes()).unwrap();
    assert_dropped(&mut c);
    assert_healthy(port);
}

#[test]
fn zero_length_body_closes_the_connection() {
    let port = spawn_server();
    let mut c = client_for(port);
    // body_len == 0: no room for the argument-count prefix.
    c.write_all(&0u32.to_le_bytes()).unwrap();
    assert_dropped(&mut c);
    assert_healthy(port);
}

#[test]
fn trailing_garbage_closes_the_connection() {
    let port = spawn_server();
    let mut c = client_for(port);
    let mut frame = write_request(&[b"keys"]).unwrap();
    let body_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) + 1;
    frame[..4].copy_from_slice(&body_len.to_le_bytes());
    frame.push(0x00);
    c.write_all(&frame).unwrap();
    assert_dropped(&mut c);
    assert_healthy(port);
}

#[test]
fn string_size_overflowing_body_closes_the_connection() {
    let port = spawn_server();
    let mut c = client_for(port);
    // nstr=1, sz=100, but only 3 bytes of payload inside the declared body.
    let mut frame = Vec::new();
    frame.extend_from_slice(&11u32.to_le_bytes());
    frame.extend_from_slice(&1u32.to_le_bytes());
    frame.extend_from_slice(&100u32.to_le_bytes());
    frame.extend_from_slice(b"abc");
    c.write_all(&frame).unwrap();
    assert_dropped(&mut c);
    assert_healthy(port);
}

#[test]
fn excessive_argument_count_closes_the_connection() {
    let port = spawn_server();
    let mut c = client_for(port);
    let mut frame = Vec::new();
    frame.extend_from_slice(&4u32.to_le_bytes());
    frame.extend_from_slice(&(200_001u32).to_le_bytes());
    c.write_all(&frame).unwrap();
    assert_dropped(&mut c);
    assert_healthy(port);
}

#[test]
fn peer_vanishing_mid_frame_leaves_server_healthy() {
    let port = spawn_server();
    let c = {
        let mut c = client_for(port);
        let frame = write_request(&[b"set", b"k", b"v"]).unwrap();
        c.write_all(&frame[..7]).unwrap();
        c
    };
    drop(c);
    thread::sleep(Duration::from_millis(50));
    assert_healthy(port);
}

#[test]
fn abuser_does_not_disturb_an_established_peer() {
    let port = spawn_server();
    let mut good = client_for(port);
    send_request(&mut good, &[b"set", b"stable", b"yes"]).unwrap();
    assert_eq!(read_response(&mut good).unwrap(), Value::Nil);

    let mut bad = client_for(port);
    bad.write_all(&((MAX_MSG as u32) + 1).to_le_bytes()).unwrap();
    assert_dropped(&mut bad);

    // The established connection and its data are untouched.
    send_request(&mut good, &[b"get", b"stable"]).unwrap();
    assert_eq!(read_response(&mut good).unwrap(), Value::Str(b"yes".to_vec()));
}

#[test]
fn max_size_frame_is_not_rejected_for_size() {
    // A structurally valid request whose body sits exactly at the limit must
    // be answered, not dropped. body = nstr(4) + (4+3) + (4+L) bytes, so a
    // key of L = MAX_MSG - 15 bytes lands on body_len == MAX_MSG exactly.
    let port = spawn_server();
    let mut c = client_for(port);
    c.set_read_timeout(Some(Duration::from_secs(30))).unwrap();
    let arg = vec![b'x'; MAX_MSG - 15];
    let mut frame = Vec::with_capacity(MAX_MSG + 4);
    frame.extend_from_slice(&(MAX_MSG as u32).to_le_bytes());
    frame.extend_from_slice(&2u32.to_le_bytes());
    frame.extend_from_slice(&3u32.to_le_bytes());
    frame.extend_from_slice(b"get");
    frame.extend_from_slice(&((MAX_MSG - 15) as u32).to_le_bytes());
    frame.extend_from_slice(&arg);
    c.write_all(&frame).unwrap();
    assert_eq!(read_response(&mut c).unwrap(), Value::Nil);
}
