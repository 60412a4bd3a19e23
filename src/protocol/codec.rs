//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use crate::error::{Error, Result};
use zerocopy::FromBytes;

use super::types::{I16BE, I32BE, U32BE};

/// Read one byte.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    data.split_first()
        .map(|(byte, rest)| (*byte, rest))
        .ok_or_else(|| Error::Protocol("read_u8: empty buffer".into()))
}

macro_rules! read_be {
    ($($(#[$doc:meta])* $fn:ident => $wrapper:ident($native:ty, $len:literal);)+) => {$(
        $(#[$doc])*
        #[inline]
        pub fn $fn(data: &[u8]) -> Result<($native, &[u8])> {
            let Some((head, rest)) = data.split_first_chunk::<$len>() else {
                return Err(Error::Protocol(format!(
                    "{}: need {} bytes, have {}",
                    stringify!($fn),
                    $len,
                    data.len()
                )));
            };
            let value = $wrapper::ref_from_bytes(head)
                .map_err(|e| Error::Protocol(format!("{}: {e:?}", stringify!($fn))))?
                .get();
            Ok((value, rest))
        }
    )+};
}

read_be! {
    /// Read an `Int16`.
    read_i16 => I16BE(i16, 2);
    /// Read an `Int32`, e.g. a length where -1 means NULL.
    read_i32 => I32BE(i32, 4);
    /// Read an unsigned 32-bit value such as an OID.
    read_u32 => U32BE(u32, 4);
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        )));
    }
    Ok((&data[..len], &data[len..]))
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Fail unless a decoder consumed the entire message body.
#[inline]
pub fn expect_end(rest: &[u8], message: &str) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "{message}: {} trailing bytes after message body",
            rest.len()
        )))
    }
}

/// Size of a tagged frame header: type byte plus length.
pub const HEADER_LEN: usize = 5;

/// Upper bound on a single backend message body.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

/// Parse a tagged frame header.
///
/// Returns the type byte and the number of body bytes that follow
/// (the length field counts itself, so the body is `length - 4`).
#[inline]
pub fn read_header(header: &[u8; HEADER_LEN]) -> Result<(u8, usize)> {
    let (tag, rest) = read_u8(header)?;
    let (len, _) = read_i32(rest)?;
    if len < 4 {
        return Err(Error::Protocol(format!(
            "invalid length {len} for message '{}'",
            tag as char
        )));
    }
    let body = len as usize - 4;
    if body > MAX_MESSAGE_LEN {
        return Err(Error::Protocol(format!(
            "message '{}' of {body} bytes exceeds the frame limit",
            tag as char
        )));
    }
    Ok((tag, body))
}

/// Write one byte.
#[inline]
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write an `Int16`.
#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write an `Int32`.
#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write an unsigned 32-bit value.
#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write raw bytes.
#[inline]
pub fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

/// Write null-terminated string (PostgreSQL String type).
#[inline]
pub fn write_cstring(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s);
    out.push(0);
}

/// Write null-terminated string from &str.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    write_cstring(out, s.as_bytes());
}

/// Message builder helper that handles the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]); // Placeholder for length
        Self { buf, start }
    }

    /// Start building a startup message (no type byte).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]); // Placeholder for length
        Self { buf, start }
    }

    /// Write a u8.
    pub fn write_u8(&mut self, value: u8) {
        write_u8(self.buf, value);
    }

    /// Write an i16.
    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    /// Write an i32.
    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    /// Write a u32.
    pub fn write_u32(&mut self, value: u32) {
        write_u32(self.buf, value);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        write_bytes(self.buf, data);
    }

    /// Write null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_length() {
        let mut buf = Vec::new();
        let mut msg = MessageBuilder::new(&mut buf, b'Q');
        msg.write_cstr("SELECT 1");
        msg.finish();

        assert_eq!(buf[0], b'Q');
        assert_eq!(&buf[1..5], &13_i32.to_be_bytes());
        assert_eq!(&buf[5..], b"SELECT 1\0");
    }

    #[test]
    fn header_of_empty_body() {
        let (tag, len) = read_header(&[b'1', 0, 0, 0, 4]).unwrap();
        assert_eq!(tag, b'1');
        assert_eq!(len, 0);
    }

    #[test]
    fn header_rejects_short_length() {
        assert!(read_header(&[b'Z', 0, 0, 0, 3]).is_err());
        assert!(read_header(&[b'Z', 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn cstring_needs_terminator() {
        let (s, rest) = read_cstr(b"abc\0def").unwrap();
        assert_eq!(s, "abc");
        assert_eq!(rest, b"def");
        assert!(read_cstr(b"abc").is_err());
    }

    #[test]
    fn short_integers_fail() {
        assert!(read_i32(&[0, 1]).is_err());
        assert!(read_i16(&[0]).is_err());
        assert!(expect_end(&[1], "Test").is_err());
    }
}
