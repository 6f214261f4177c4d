//! Blocking client side of the protocol.
//!
//! The server side never blocks; a client happily can. These helpers speak
//! one request/response exchange over an ordinary `TcpStream` and are shared
//! by the `bytekv-cli` binary and the end-to-end suites.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::config::MAX_MSG;
use crate::wire::{read_value, write_request, FrameError, Value};

/// Connect to a server.
pub fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    TcpStream::connect((host, port))
}

/// Encode `cmd` as a request frame and write it out in full.
pub fn send_request(stream: &mut TcpStream, cmd: &[&[u8]]) -> io::Result<()> {
    let frame = write_request(cmd)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    stream.write_all(&frame)
}

/// Blocking-read exactly one response frame and decode its value.
pub fn read_response(stream: &mut TcpStream) -> io::Result<Value> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let body_len = u32::from_le_bytes(prefix) as usize;
    if body_len > MAX_MSG {
        return Err(io::Error::new(io::ErrorKind::InvalidData, FrameError::Oversize));
    }
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body)?;
    let (value, used) =
        read_value(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if used != body.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, FrameError::TrailingGarbage));
    }
    Ok(value)
}

/// Human-readable rendering of a decoded value, one line per scalar,
/// arrays indented under their header.
pub fn render(value: &Value) -> String {
    let mut out = String::new();
    render_into(value, 0, &mut out);
    out
}

fn render_into(value: &Value, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    match value {
        Value::Nil => out.push_str("(nil)\n"),
        Value::Err { code, msg } => {
            out.push_str(&format!("(err) {code} {}\n", String::from_utf8_lossy(msg)));
        }
        Value::Str(s) => {
            out.push_str(&format!("\"{}\"\n", String::from_utf8_lossy(s)));
        }
        Value::Int(v) => out.push_str(&format!("(int) {v}\n")),
        Value::Dbl(v) => out.push_str(&format!("(dbl) {v}\n")),
        Value::Arr(items) => {
            out.push_str(&format!("(arr) len={}\n", items.len()));
            for item in items {
                render_into(item, depth + 1, out);
            }
        }
    }
}
