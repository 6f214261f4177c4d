//! Wire protocol: request envelope and tagged response values.
//!
//! Everything on the wire is little-endian. A request is a length-prefixed
//! array of byte strings:
//!
//! ```text
//! frame := u32 body_len  body[body_len]
//! body  := u32 nstr  (u32 sz  bytes[sz]) × nstr
//! ```
//!
//! A response body is a stream of tagged values behind the same u32 frame
//! prefix:
//!
//! ```text
//! value := u8 tag  value_body(tag)
//!   0 NIL  (empty)
//!   1 ERR  i32 code  u32 len  bytes[len]
//!   2 STR  u32 len  bytes[len]
//!   3 INT  i64
//!   4 DBL  f64 (IEEE-754, little-endian)
//!   5 ARR  u32 nelem  value × nelem
//! ```
//!
//! The writer side appends into a [`Buf`]; the reader side decodes from a
//! byte slice and exists for clients and round-trip tests — the server never
//! parses its own responses.

use std::fmt;

use crate::buf::Buf;
use crate::config::{MAX_ARGS, MAX_MSG};

// ── Tags and error codes ──────────────────────────────────────────────────────

/// First byte of every response value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Tag {
    Nil = 0,
    Err = 1,
    Str = 2,
    Int = 3,
    Dbl = 4,
    Arr = 5,
}

impl Tag {
    fn from_u8(byte: u8) -> Option<Tag> {
        match byte {
            0 => Some(Tag::Nil),
            1 => Some(Tag::Err),
            2 => Some(Tag::Str),
            3 => Some(Tag::Int),
            4 => Some(Tag::Dbl),
            5 => Some(Tag::Arr),
            _ => None,
        }
    }
}

/// ERR code: request was not a recognized command.
pub const ERR_UNKNOWN: i32 = 1;
/// ERR code: the response body outgrew [`MAX_MSG`].
pub const ERR_TOO_BIG: i32 = 2;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a frame or value failed to decode. Any of these on a server
/// connection closes it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameError {
    /// Declared body length exceeds [`MAX_MSG`].
    Oversize,
    /// Argument count exceeds [`MAX_ARGS`].
    TooManyArgs,
    /// A length prefix runs past the end of the body.
    Truncated,
    /// The body's strings did not consume it exactly.
    TrailingGarbage,
    /// Unknown value tag byte.
    BadTag(u8),
    /// Value nesting beyond [`MAX_VALUE_DEPTH`].
    NestedTooDeep,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Oversize => write!(f, "frame exceeds the {} byte limit", MAX_MSG),
            FrameError::TooManyArgs => write!(f, "more than {} arguments", MAX_ARGS),
            FrameError::Truncated => write!(f, "length prefix overruns the frame"),
            FrameError::TrailingGarbage => write!(f, "trailing bytes after the last string"),
            FrameError::BadTag(t) => write!(f, "unknown value tag {t:#04x}"),
            FrameError::NestedTooDeep => write!(f, "value nesting too deep"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Array nesting accepted by the value reader.
pub const MAX_VALUE_DEPTH: usize = 32;

// ── Request envelope ──────────────────────────────────────────────────────────

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, FrameError> {
    let bytes = buf.get(*pos..*pos + 4).ok_or(FrameError::Truncated)?;
    *pos += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], FrameError> {
    let bytes = buf.get(*pos..*pos + n).ok_or(FrameError::Truncated)?;
    *pos += n;
    Ok(bytes)
}

/// Decode a request body into its argument strings.
///
/// The body must be consumed exactly; the frame prefix has already been
/// stripped by the connection engine.
pub fn parse_request(body: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
    let mut pos = 0;
    let nstr = read_u32(body, &mut pos)?;
    if nstr > MAX_ARGS {
        return Err(FrameError::TooManyArgs);
    }
    // Capacity from the declared count, clamped: a hostile nstr must not
    // translate into a giant allocation before its strings exist.
    let mut out = Vec::with_capacity(nstr.min(1024) as usize);
    while out.len() < nstr as usize {
        let sz = read_u32(body, &mut pos)? as usize;
        out.push(read_bytes(body, &mut pos, sz)?.to_vec());
    }
    if pos != body.len() {
        return Err(FrameError::TrailingGarbage);
    }
    Ok(out)
}

/// Encode a complete request frame (prefix included) for `cmd`.
pub fn write_request(cmd: &[&[u8]]) -> Result<Vec<u8>, FrameError> {
    let mut body_len = 4usize;
    for part in cmd {
        body_len += 4 + part.len();
    }
    if body_len > MAX_MSG {
        return Err(FrameError::Oversize);
    }
    let mut frame = Vec::with_capacity(4 + body_len);
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    frame.extend_from_slice(&(cmd.len() as u32).to_le_bytes());
    for part in cmd {
        frame.extend_from_slice(&(part.len() as u32).to_le_bytes());
        frame.extend_from_slice(part);
    }
    Ok(frame)
}

// ── Response writer ───────────────────────────────────────────────────────────

fn put_u8(out: &mut Buf, v: u8) {
    out.append(&[v]);
}

fn put_u32(out: &mut Buf, v: u32) {
    out.append(&v.to_le_bytes());
}

fn put_i32(out: &mut Buf, v: i32) {
    out.append(&v.to_le_bytes());
}

/// Append a NIL value.
pub fn out_nil(out: &mut Buf) {
    put_u8(out, Tag::Nil as u8);
}

/// Append a STR value.
pub fn out_str(out: &mut Buf, s: &[u8]) {
    put_u8(out, Tag::Str as u8);
    put_u32(out, s.len() as u32);
    out.append(s);
}

/// Append an INT value.
pub fn out_int(out: &mut Buf, v: i64) {
    put_u8(out, Tag::Int as u8);
    out.append(&v.to_le_bytes());
}

/// Append a DBL value (IEEE-754, little-endian).
pub fn out_dbl(out: &mut Buf, v: f64) {
    put_u8(out, Tag::Dbl as u8);
    out.append(&v.to_le_bytes());
}

/// Append an ERR value.
pub fn out_err(out: &mut Buf, code: i32, msg: &str) {
    put_u8(out, Tag::Err as u8);
    put_i32(out, code);
    put_u32(out, msg.len() as u32);
    out.append(msg.as_bytes());
}

/// Append an ARR header declaring `n` elements; the caller appends the
/// elements next.
pub fn out_arr(out: &mut Buf, n: u32) {
    put_u8(out, Tag::Arr as u8);
    put_u32(out, n);
}

// ── Response framing ──────────────────────────────────────────────────────────

/// Reserve the response's u32 frame prefix in `out` and return its mark for
/// [`response_end`].
pub fn response_begin(out: &mut Buf) -> usize {
    out.reserve_u32()
}

/// Finalize the frame opened at `mark`: enforce the body size cap and patch
/// the length prefix in place.
///
/// A body past [`MAX_MSG`] is discarded and replaced by a single ERR value,
/// keeping the connection usable.
pub fn response_end(out: &mut Buf, mark: usize) {
    let mut body_len = out.len() - mark - 4;
    if body_len > MAX_MSG {
        out.truncate(mark + 4);
        out_err(out, ERR_TOO_BIG, "response is too big");
        body_len = out.len() - mark - 4;
    }
    out.patch_u32(mark, body_len as u32);
}

// ── Response reader ───────────────────────────────────────────────────────────

/// A decoded response value.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Nil,
    Err { code: i32, msg: Vec<u8> },
    Str(Vec<u8>),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Value>),
}

/// Decode one value from the front of `buf`, returning it with the number of
/// bytes consumed.
pub fn read_value(buf: &[u8]) -> Result<(Value, usize), FrameError> {
    let mut pos = 0;
    let value = parse_value(buf, &mut pos, 0)?;
    Ok((value, pos))
}

fn parse_value(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Value, FrameError> {
    if depth > MAX_VALUE_DEPTH {
        return Err(FrameError::NestedTooDeep);
    }
    let tag = *buf.get(*pos).ok_or(FrameError::Truncated)?;
    *pos += 1;
    match Tag::from_u8(tag).ok_or(FrameError::BadTag(tag))? {
        Tag::Nil => Ok(Value::Nil),
        Tag::Err => {
            let code = read_u32(buf, pos)? as i32;
            let len = read_u32(buf, pos)? as usize;
            let msg = read_bytes(buf, pos, len)?.to_vec();
            Ok(Value::Err { code, msg })
        }
        Tag::Str => {
            let len = read_u32(buf, pos)? as usize;
            Ok(Value::Str(read_bytes(buf, pos, len)?.to_vec()))
        }
        Tag::Int => {
            let bytes = read_bytes(buf, pos, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(Value::Int(i64::from_le_bytes(raw)))
        }
        Tag::Dbl => {
            let bytes = read_bytes(buf, pos, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(Value::Dbl(f64::from_le_bytes(raw)))
        }
        Tag::Arr => {
            let n = read_u32(buf, pos)?;
            let mut items = Vec::with_capacity(n.min(1024) as usize);
            for _ in 0..n {
                items.push(parse_value(buf, pos, depth + 1)?);
            }
            Ok(Value::Arr(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(build: impl FnOnce(&mut Buf)) -> Vec<u8> {
        let mut out = Buf::new();
        let mark = response_begin(&mut out);
        build(&mut out);
        response_end(&mut out, mark);
        out.as_slice().to_vec()
    }

    // ── Request envelope ─────────────────────────────────────────────────────

    #[test]
    fn set_request_frame_layout() {
        let frame = write_request(&[b"set", b"k", b"v"]).unwrap();
        // body: nstr + (4+3) + (4+1) + (4+1) = 21 bytes
        let mut expect = vec![21, 0, 0, 0, 3, 0, 0, 0];
        expect.extend_from_slice(&[3, 0, 0, 0]);
        expect.extend_from_slice(b"set");
        expect.extend_from_slice(&[1, 0, 0, 0]);
        expect.extend_from_slice(b"k");
        expect.extend_from_slice(&[1, 0, 0, 0]);
        expect.extend_from_slice(b"v");
        assert_eq!(frame, expect);
    }

    #[test]
    fn request_round_trip() {
        let frame = write_request(&[b"set", b"key", b"value with spaces"]).unwrap();
        let args = parse_request(&frame[4..]).unwrap();
        assert_eq!(args, vec![b"set".to_vec(), b"key".to_vec(), b"value with spaces".to_vec()]);
    }

    #[test]
    fn empty_argument_is_legal() {
        let frame = write_request(&[b"get", b""]).unwrap();
        let args = parse_request(&frame[4..]).unwrap();
        assert_eq!(args, vec![b"get".to_vec(), Vec::new()]);
    }

    #[test]
    fn empty_body_is_truncated() {
        // A zero-length body has no room for the nstr prefix.
        assert_eq!(parse_request(&[]), Err(FrameError::Truncated));
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut frame = write_request(&[b"keys"]).unwrap();
        frame.push(0xFF);
        assert_eq!(parse_request(&frame[4..]), Err(FrameError::TrailingGarbage));
    }

    #[test]
    fn argument_overrunning_body_rejected() {
        // nstr=1, sz=8, but only 3 payload bytes follow.
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&8u32.to_le_bytes());
        body.extend_from_slice(b"abc");
        assert_eq!(parse_request(&body), Err(FrameError::Truncated));
    }

    #[test]
    fn too_many_args_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&(MAX_ARGS + 1).to_le_bytes());
        assert_eq!(parse_request(&body), Err(FrameError::TooManyArgs));
    }

    #[test]
    fn declared_count_short_of_strings_rejected() {
        // nstr=2 but only one string present.
        let mut body = Vec::new();
        body.extend_from_slice(&2u32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        body.push(b'x');
        assert_eq!(parse_request(&body), Err(FrameError::Truncated));
    }

    // ── Response writer: exact byte layouts ──────────────────────────────────

    #[test]
    fn nil_response_frame() {
        assert_eq!(frame_bytes(out_nil), [1, 0, 0, 0, 0]);
    }

    #[test]
    fn int_response_frame() {
        let frame = frame_bytes(|out| out_int(out, 1));
        assert_eq!(frame, [9, 0, 0, 0, 3, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn err_unknown_command_frame() {
        let frame = frame_bytes(|out| out_err(out, ERR_UNKNOWN, "unknown command"));
        let mut expect = vec![24, 0, 0, 0];
        expect.push(1); // ERR tag
        expect.extend_from_slice(&1i32.to_le_bytes());
        expect.extend_from_slice(&15u32.to_le_bytes());
        expect.extend_from_slice(b"unknown command");
        assert_eq!(frame, expect);
    }

    #[test]
    fn str_and_arr_layout() {
        let frame = frame_bytes(|out| {
            out_arr(out, 2);
            out_str(out, b"a");
            out_str(out, b"bc");
        });
        let mut expect = vec![18, 0, 0, 0];
        expect.push(5); // ARR tag
        expect.extend_from_slice(&2u32.to_le_bytes());
        expect.extend_from_slice(&[2, 1, 0, 0, 0, b'a']);
        expect.extend_from_slice(&[2, 2, 0, 0, 0, b'b', b'c']);
        assert_eq!(frame, expect);
    }

    #[test]
    fn dbl_is_little_endian() {
        let frame = frame_bytes(|out| out_dbl(out, 1.5));
        assert_eq!(frame[4], 4);
        assert_eq!(&frame[5..], &1.5f64.to_le_bytes());
    }

    // ── Overflow guard ───────────────────────────────────────────────────────

    #[test]
    fn oversize_body_replaced_with_err() {
        let mut out = Buf::new();
        let mark = response_begin(&mut out);
        // A STR whose payload alone busts the cap.
        out_str(&mut out, &vec![0u8; MAX_MSG]);
        response_end(&mut out, mark);

        let frame = out.as_slice();
        let body_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(body_len, frame.len() - 4);
        let (value, used) = read_value(&frame[4..]).unwrap();
        assert_eq!(used, body_len);
        match value {
            Value::Err { code, msg } => {
                assert_eq!(code, ERR_TOO_BIG);
                assert_eq!(msg, b"response is too big");
            }
            other => panic!("expected ERR, got {other:?}"),
        }
    }

    #[test]
    fn body_at_exactly_the_cap_passes() {
        let mut out = Buf::new();
        let mark = response_begin(&mut out);
        // tag + len prefix + payload == MAX_MSG exactly.
        out_str(&mut out, &vec![0u8; MAX_MSG - 5]);
        response_end(&mut out, mark);
        let frame = out.as_slice();
        let body_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(body_len, MAX_MSG);
        assert!(matches!(read_value(&frame[4..]), Ok((Value::Str(_), _))));
    }

    // ── Response reader ──────────────────────────────────────────────────────

    #[test]
    fn value_round_trip() {
        let frame = frame_bytes(|out| {
            out_arr(out, 5);
            out_nil(out);
            out_err(out, ERR_UNKNOWN, "unknown command");
            out_str(out, b"payload");
            out_int(out, -42);
            out_dbl(out, 2.75);
        });
        let (value, used) = read_value(&frame[4..]).unwrap();
        assert_eq!(used, frame.len() - 4);
        assert_eq!(
            value,
            Value::Arr(vec![
                Value::Nil,
                Value::Err { code: ERR_UNKNOWN, msg: b"unknown command".to_vec() },
                Value::Str(b"payload".to_vec()),
                Value::Int(-42),
                Value::Dbl(2.75),
            ])
        );
    }

    #[test]
    fn truncated_value_rejected() {
        let mut out = Buf::new();
        out_int(&mut out, 7);
        let bytes = out.as_slice();
        assert_eq!(read_value(&bytes[..5]), Err(FrameError::Truncated));
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(read_value(&[9]), Err(FrameError::BadTag(9)));
    }

    #[test]
    fn runaway_nesting_rejected() {
        // ARR-of-ARR-of-… past the depth cap.
        let mut bytes = Vec::new();
        for _ in 0..MAX_VALUE_DEPTH + 2 {
            bytes.push(Tag::Arr as u8);
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        bytes.push(Tag::Nil as u8);
        assert_eq!(read_value(&bytes), Err(FrameError::NestedTooDeep));
    }
}
