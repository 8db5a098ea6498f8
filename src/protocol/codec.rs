//! Wire framing primitives.
//!
//! All integers on the wire are big-endian.

use zerocopy::FromBytes;

use super::types::{I16BE, I32BE, U32BE};
use crate::error::{Error, Result};

fn short(what: &str, have: usize, need: usize) -> Error {
    Error::protocol(format!("{what}: frame too short: {have} < {need}"))
}

/// Read one byte.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((b, rest)) => Ok((*b, rest)),
        None => Err(short("read_u8", 0, 1)),
    }
}

/// Read a big-endian `i16`.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (head, rest) = read_bytes(data, 2).map_err(|_| short("read_i16", data.len(), 2))?;
    Ok((I16BE::ref_from_bytes(head)?.get(), rest))
}

/// Read a big-endian `i32`.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (head, rest) = read_bytes(data, 4).map_err(|_| short("read_i32", data.len(), 4))?;
    Ok((I32BE::ref_from_bytes(head)?.get(), rest))
}

/// Read a big-endian `u32`.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (head, rest) = read_bytes(data, 4).map_err(|_| short("read_u32", data.len(), 4))?;
    Ok((U32BE::ref_from_bytes(head)?.get(), rest))
}

/// Read `len` raw bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(short("read_bytes", data.len(), len));
    }
    Ok(data.split_at(len))
}

/// Read a NUL-terminated string, returning it without the terminator.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::protocol("read_cstring: missing NUL terminator")),
    }
}

/// Read a NUL-terminated UTF-8 string.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|e| Error::protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Builds one frontend message and patches its length on [`finish`](Self::finish).
///
/// Layout: type byte (not counted), then an `i32` length that counts itself,
/// then the payload.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::untyped(buf)
    }

    /// Start a message without a type byte (StartupMessage, SSLRequest, CancelRequest).
    pub fn untyped(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, start }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Patch the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
