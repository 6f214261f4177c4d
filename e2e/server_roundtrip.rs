//! E2E Suite 01: command round-trips against a live server.
//!
//! Each test spins up a real server on an ephemeral loopback port in a
//! background thread and talks to it over TCP with the blocking client
//! helpers — the exact path a production peer takes.

use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use bytekv::client::{connect, read_response, send_request};
use bytekv::cmd::Store;
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

fn roundtrip(stream: &mut TcpStream, cmd: &[&[u8]]) -> Value {
    send_request(stream, cmd).expect("send");
    read_response(stream).expect("response")
}

// ─────────────────────────────────────────────────────────────────────────────
// Core command laws
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn set_then_get_returns_the_value() {
    let mut c = client_for(spawn_server());
    assert_eq!(roundtrip(&mut c, &[b"set", b"k", b"v"]), Value::Nil);
    assert_eq!(roundtrip(&mut c, &[b"get", b"k"]), Value::Str(b"v".to_vec()));
}

#[test]
fn get_on_empty_store_is_nil() {
    let mut c = client_for(spawn_server());
    assert_eq!(roundtrip(&mut c, &[b"get", b"missing"]), Value::Nil);
}

#[test]
fn second_set_wins() {
    let mut c = client_for(spawn_server());
    roundtrip(&mut c, &[b"set", b"k", b"v1"]);
    roundtrip(&mut c, &[b"set", b"k", b"v2"]);
    assert_eq!(roundtrip(&mut c, &[b"get", b"k"]), Value::Str(b"v2".to_vec()));
}

#[test]
fn del_then_get_then_del_again() {
    let mut c = client_for(spawn_server());
    roundtrip(&mut c, &[b"set", b"k", b"v"]);
    assert_eq!(roundtrip(&mut c, &[b"del", b"k"]), Value::Int(1));
    assert_eq!(roundtrip(&mut c, &[b"get", b"k"]), Value::Nil);
    assert_eq!(roundtrip(&mut c, &[b"del", b"k"]), Value::Int(0));
}

#[test]
fn keys_enumerates_each_key_once() {
    let mut c = client_for(spawn_server());
    roundtrip(&mut c, &[b"set", b"a", b"1"]);
    roundtrip(&mut c, &[b"set", b"b", b"2"]);
    let Value::Arr(items) = roundtrip(&mut c, &[b"keys"]) else {
        panic!("keys must answer ARR");
    };
    let mut names: Vec<Vec<u8>> = items
        .into_iter()
        .map(|v| match v {
            Value::Str(s) => s,
            other => panic!("expected STR, got {other:?}"),
        })
        .collect();
    names.sort();
    assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn unknown_command_answers_err_1() {
    let mut c = client_for(spawn_server());
    match roundtrip(&mut c, &[b"frobnicate"]) {
        Value::Err { code, msg } => {
            assert_eq!(code, 1);
            assert_eq!(msg, b"unknown command");
        }
        other => panic!("expected ERR, got {other:?}"),
    }
    // The connection survives a command error.
    assert_eq!(roundtrip(&mut c, &[b"get", b"x"]), Value::Nil);
}

// ─────────────────────────────────────────────────────────────────────────────
// Exact wire bytes (the frame layout is the contract)
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn raw_set_frame_and_nil_reply_bytes() {
    use std::io::Read;

    let mut c = client_for(spawn_server());
    let frame = write_request(&[b"set", b"k", b"v"]).unwrap();
    c.write_all(&frame).unwrap();

    let mut reply = [0u8; 5];
    c.read_exact(&mut reply).unwrap();
    // body_len = 1, body = NIL tag
    assert_eq!(reply, [1, 0, 0, 0, 0]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipelining and fragmentation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn pipelined_requests_answered_in_order() {
    let mut c = client_for(spawn_server());
    let mut burst = write_request(&[b"set", b"k", b"v"]).unwrap();
    burst.extend(write_request(&[b"get", b"k"]).unwrap());
    burst.extend(write_request(&[b"del", b"k"]).unwrap());
    c.write_all(&burst).unwrap();

    assert_eq!(read_response(&mut c).unwrap(), Value::Nil);
    assert_eq!(read_response(&mut c).unwrap(), Value::Str(b"v".to_vec()));
    assert_eq!(read_response(&mut c).unwrap(), Value::Int(1));
}

#[test]
fn frame_split_across_writes_reassembles() {
    let mut c = client_for(spawn_server());
    let frame = write_request(&[b"set", b"fragmented", b"request"]).unwrap();
    for piece in frame.chunks(5) {
        c.write_all(piece).unwrap();
        c.flush().unwrap();
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(read_response(&mut c).unwrap(), Value::Nil);
    assert_eq!(
        roundtrip(&mut c, &[b"get", b"fragmented"]),
        Value::Str(b"request".to_vec())
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Volume: values larger than one read, stores larger than one table
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn megabyte_value_round_trips() {
    let mut c = client_for(spawn_server());
    let big: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(roundtrip(&mut c, &[b"set", b"big", &big]), Value::Nil);
    assert_eq!(roundtrip(&mut c, &[b"get", b"big"]), Value::Str(big));
}

#[test]
fn hundreds_of_keys_survive_rehashing() {
    let mut c = client_for(spawn_server());
    for i in 0..500u32 {
        let key = format!("key:{i}");
        let val = format!("val:{i}");
        assert_eq!(
            roundtrip(&mut c, &[b"set", key.as_bytes(), val.as_bytes()]),
            Value::Nil
        );
    }
    for i in 0..500u32 {
        let key = format!("key:{i}");
        let val = format!("val:{i}");
        assert_eq!(
            roundtrip(&mut c, &[b"get", key.as_bytes()]),
            Value::Str(val.into_bytes()),
            "lost {key}"
        );
    }
    let Value::Arr(items) = roundtrip(&mut c, &[b"keys"]) else {
        panic!("keys must answer ARR");
    };
    assert_eq!(items.len(), 500);
}

// ─────────────────────────────────────────────────────────────────────────────
// Multiple peers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn two_clients_share_the_store() {
    let port = spawn_server();
    let mut a = client_for(port);
    let mut b = client_for(port);

    roundtrip(&mut a, &[b"set", b"shared", b"from-a"]);
    assert_eq!(
        roundtrip(&mut b, &[b"get", b"shared"]),
        Value::Str(b"from-a".to_vec())
    );
    roundtrip(&mut b, &[b"set", b"shared", b"from-b"]);
    assert_eq!(
        roundtrip(&mut a, &[b"get", b"shared"]),
        Value::Str(b"from-b".to_vec())
    );
}

#[test]
fn interleaved_clients_get_their_own_responses() {
    let port = spawn_server();
    let mut a = client_for(port);
    let mut b = client_for(port);

    send_request(&mut a, &[b"set", b"ka", b"va"]).unwrap();
    send_request(&mut b, &[b"set", b"kb", b"vb"]).unwrap();
    send_request(&mut a, &[b"get", b"ka"]).unwrap();
    send_request(&mut b, &[b"get", b"kb"]).unwrap();

    assert_eq!(read_response(&mut a).unwrap(), Value::Nil);
    assert_eq!(read_response(&mut b).unwrap(), Value::Nil);
    assert_eq!(read_response(&mut a).unwrap(), Value::Str(b"va".to_vec()));
    assert_eq!(read_response(&mut b).unwrap(), Value::Str(b"vb".to_vec()));
}
