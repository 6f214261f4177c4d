//! Per-connection state machine.
//!
//! A connection is the socket plus two byte queues and three intents. The
//! intents drive the poll set: `want_read` and `want_write` select the
//! readiness events the next tick asks for, `want_close` hands the
//! connection to the event loop for teardown. At least one intent is always
//! set, and once `want_close` goes up it never comes down.
//!
//! Reads drain every complete frame they can (pipelined requests each get a
//! framed response, in order) and then flip to writing with an immediate
//! opportunistic flush, which in the common case completes the whole
//! request/response cycle inside one readiness event.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use crate::buf::Buf;
use crate::cmd::{self, Store};
use crate::config::{EGRESS_CAP, MAX_MSG, READ_CHUNK};
use crate::wire;

pub struct Conn {
    stream: TcpStream,
    peer: SocketAddr,
    pub want_read: bool,
    pub want_write: bool,
    pub want_close: bool,
    /// Bytes received and not yet parsed.
    pub ingress: Buf,
    /// Framed responses not yet written out.
    pub egress: Buf,
}

impl Conn {
    /// Wrap a freshly accepted stream. The socket is switched to
    /// non-blocking mode; the connection starts out wanting to read.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Conn {
            stream,
            peer,
            want_read: true,
            want_write: false,
            want_close: false,
            ingress: Buf::new(),
            egress: Buf::new(),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Socket readable: pull a chunk, drain complete frames, start flushing
    /// any responses produced.
    pub fn handle_read(&mut self, store: &mut Store) {
        let mut scratch = [0u8; READ_CHUNK];
        let n = match self.stream.read(&mut scratch) {
            Ok(0) => {
                if self.ingress.is_empty() {
                    crate::verbose!(2, "client {} closed connection", self.peer);
                } else {
                    crate::verbose!(1, "unexpected EOF from {} mid-frame", self.peer);
                }
                self.want_close = true;
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                return;
            }
            Err(e) => {
                crate::verbose!(1, "read error from {}: {e}", self.peer);
                self.want_close = true;
                return;
            }
        };
        self.ingress.append(&scratch[..n]);

        // Pipelining: answer every complete frame already buffered.
        while self.try_one_request(store) {}

        if !self.egress.is_empty() && !self.want_close {
            self.want_read = false;
            self.want_write = true;
            // The peer is usually ready; try to finish the cycle now instead
            // of paying another poll round-trip.
            self.handle_write();
        }
    }

    /// Socket writable: push as much egress as the kernel takes.
    pub fn handle_write(&mut self) {
        if self.egress.is_empty() {
            self.want_read = true;
            self.want_write = false;
            return;
        }
        match self.stream.write(self.egress.as_slice()) {
            Ok(n) => {
                self.egress.consume(n);
                if self.egress.is_empty() {
                    self.want_read = true;
                    self.want_write = false;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                crate::verbose!(1, "write error to {}: {e}", self.peer);
                self.want_close = true;
            }
        }
    }

    /// Parse and answer one frame from `ingress`. Returns false when no
    /// complete frame is buffered or the connection is condemned.
    fn try_one_request(&mut self, store: &mut Store) -> bool {
        let header = self.ingress.as_slice();
        if header.len() < 4 {
            return false;
        }
        let body_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if body_len > MAX_MSG {
            crate::verbose!(1, "oversize frame ({body_len} bytes) from {}", self.peer);
            self.want_close = true;
            return false;
        }
        if self.ingress.len() < 4 + body_len {
            return false;
        }

        let body = &self.ingress.as_slice()[4..4 + body_len];
        let cmd = match wire::parse_request(body) {
            Ok(cmd) => cmd,
            Err(e) => {
                crate::verbose!(1, "bad request from {}: {e}", self.peer);
                self.want_close = true;
                return false;
            }
        };
        crate::verbose!(3, "{} -> {} args, {body_len} byte body", self.peer, cmd.len());

        let mark = wire::response_begin(&mut self.egress);
        cmd::do_request(store, cmd, &mut self.egress);
        wire::response_end(&mut self.egress, mark);

        self.ingress.consume(4 + body_len);

        if self.egress.len() > EGRESS_CAP {
            crate::verbose!(1, "egress backlog for {} over cap, dropping peer", self.peer);
            self.want_close = true;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client;
    use crate::wire::{write_request, Value};
    use std::net::TcpListener;
    use std::thread::sleep;
    use std::time::Duration;

    /// Loopback socket pair: the peer end plus an engine-side Conn.
    fn pair() -> (TcpStream, Conn) {
        crate::verbose::set_notice_level(0);
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let peer = TcpStream::connect(addr).expect("connect");
        let (stream, peer_addr) = listener.accept().expect("accept");
        let conn = Conn::new(stream, peer_addr).expect("conn");
        (peer, conn)
    }

    /// Give the loopback a moment to make written bytes readable.
    fn settle() {
        sleep(Duration::from_millis(30));
    }

    #[test]
    fn starts_wanting_read() {
        let (_peer, conn) = pair();
        assert!(conn.want_read && !conn.want_write && !conn.want_close);
        assert!(conn.want_read || conn.want_write || conn.want_close);
    }

    #[test]
    fn two_pipelined_frames_two_ordered_responses() {
        let (mut peer, mut conn) = pair();
        let mut store = Store::new();

        let mut bytes = write_request(&[b"set", b"k", b"v"]).unwrap();
        bytes.extend(write_request(&[b"get", b"k"]).unwrap());
        peer.write_all(&bytes).unwrap();
        settle();

        conn.handle_read(&mut store);
        assert!(!conn.want_close);

        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(client::read_response(&mut peer).unwrap(), Value::Nil);
        assert_eq!(client::read_response(&mut peer).unwrap(), Value::Str(b"v".to_vec()));
    }

    #[test]
    fn fragmented_frame_reassembles() {
        let (mut peer, mut conn) = pair();
        let mut store = Store::new();

        let bytes = write_request(&[b"set", b"frag", b"mented"]).unwrap();
        for piece in bytes.chunks(3) {
            peer.write_all(piece).unwrap();
            peer.flush().unwrap();
            settle();
            conn.handle_read(&mut store);
        }
        assert!(!conn.want_close);

        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(client::read_response(&mut peer).unwrap(), Value::Nil);
        assert_eq!(store.get(b"frag"), Some(b"mented".as_slice()));
    }

    #[test]
    fn egress_nonempty_implies_want_write() {
        let (mut peer, mut conn) = pair();
        let mut store = Store::new();
        peer.write_all(&write_request(&[b"get", b"x"]).unwrap()).unwrap();
        settle();
        conn.handle_read(&mut store);
        // The opportunistic flush usually empties egress on loopback; the
        // invariant must hold either way.
        if !conn.egress.is_empty() {
            assert!(conn.want_write);
        } else {
            assert!(conn.want_read);
        }
    }

    #[test]
    fn clean_eof_marks_close() {
        let (peer, mut conn) = pair();
        let mut store = Store::new();
        drop(peer);
        settle();
        conn.handle_read(&mut store);
        assert!(conn.want_close);
    }

    #[test]
    fn eof_mid_frame_marks_close() {
        let (mut peer, mut conn) = pair();
        let mut store = Store::new();
        // First half of a valid frame, then hang up.
        let bytes = write_request(&[b"set", b"k", b"v"]).unwrap();
        peer.write_all(&bytes[..6]).unwrap();
        settle();
        conn.handle_read(&mut store);
        assert!(!conn.want_close, "partial frame must simply wait");
        drop(peer);
        settle();
        conn.handle_read(&mut store);
        assert!(conn.want_close);
    }

    #[test]
    fn oversize_frame_header_condemns_connection() {
        let (mut peer, mut conn) = pair();
        let mut store = Store::new();
        peer.write_all(&((MAX_MSG as u32) + 1).to_le_bytes()).unwrap();
        settle();
        conn.handle_read(&mut store);
        assert!(conn.want_close);
    }

    #[test]
    fn garbage_body_condemns_connection() {
        let (mut peer, mut conn) = pair();
        let mut store = Store::new();
        let mut frame = write_request(&[b"keys"]).unwrap();
        // Corrupt: declare one more byte than the strings consume.
        let body_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) + 1;
        frame[..4].copy_from_slice(&body_len.to_le_bytes());
        frame.push(0xAB);
        peer.write_all(&frame).unwrap();
        settle();
        conn.handle_read(&mut store);
        assert!(conn.want_close);
    }
}
