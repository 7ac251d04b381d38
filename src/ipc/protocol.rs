//! Wire protocol codec.
//!
//! A frame is a 7-byte header (magic `0x56 0x10`, version `0x01`,
//! little-endian u32 payload length) followed by the payload. Inside a
//! payload every integer is little-endian and strings are u32
//! length-prefixed bytes; UTF-8 is not enforced at this layer. Requests are
//! `u32 id, u8 command, body`; responses are `u32 id, u8 status, body`.
//!
//! The same field primitives serialize the on-disk state snapshot, so the
//! wire and disk formats share one codec.

use crate::error::ProtocolError;

pub const MAGIC: [u8; 2] = [0x56, 0x10];
pub const VERSION: u8 = 0x01;
pub const HEADER_LEN: usize = 7;
pub const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

pub const STATUS_OK: u8 = 0;
pub const STATUS_ERR: u8 = 1;

type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Command {
    ProcessStart = 0x01,
    ProcessStop = 0x02,
    ProcessRestart = 0x03,
    ProcessDelete = 0x04,
    ProcessList = 0x05,
    ProcessInfo = 0x06,
    ProcessScale = 0x07,
    LogRead = 0x10,
    StateSave = 0x30,
    StateLoad = 0x31,
    Ping = 0x40,
    Shutdown = 0x41,
}

/// Prepend a frame header to `payload`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a frame header, returning the payload length that follows it.
pub fn decode_header(buf: &[u8]) -> Result<usize> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            wanted: HEADER_LEN,
            remaining: buf.len(),
        });
    }
    if buf[0..2] != MAGIC {
        return Err(ProtocolError::BadMagic);
    }
    if buf[2] != VERSION {
        return Err(ProtocolError::UnsupportedVersion(buf[2]));
    }
    let len = u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    Ok(len)
}

#[derive(Debug)]
pub struct Request<'a> {
    pub id: u32,
    pub command: u8,
    pub body: &'a [u8],
}

pub fn decode_request(payload: &[u8]) -> Result<Request<'_>> {
    let mut r = PayloadReader::new(payload);
    let id = r.u32()?;
    let command = r.u8()?;
    Ok(Request {
        id,
        command,
        body: r.rest(),
    })
}

pub fn encode_request(id: u32, command: Command, body: &[u8]) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.u32(id).u8(command as u8).raw(body);
    w.into_inner()
}

#[derive(Debug)]
pub struct Response<'a> {
    pub id: u32,
    pub status: u8,
    pub body: &'a [u8],
}

pub fn decode_response(payload: &[u8]) -> Result<Response<'_>> {
    let mut r = PayloadReader::new(payload);
    let id = r.u32()?;
    let status = r.u8()?;
    Ok(Response {
        id,
        status,
        body: r.rest(),
    })
}

pub fn encode_response(id: u32, status: u8, body: &[u8]) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.u32(id).u8(status).raw(body);
    w.into_inner()
}

/// Reads typed fields out of a payload slice. Never reads past the slice;
/// underflow is a `Truncated` error, not zeros.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let b = self.take(len)?;
        Ok(String::from_utf8_lossy(b).into_owned())
    }

    // The `_or` readers implement forward compatibility for payloads that
    // were encoded by an older peer: a field that starts exactly at
    // end-of-buffer takes its documented default, while a partially present
    // field is still a truncation error.

    pub fn u8_or(&mut self, default: u8) -> Result<u8> {
        if self.at_end() { Ok(default) } else { self.u8() }
    }

    pub fn u32_or(&mut self, default: u32) -> Result<u32> {
        if self.at_end() { Ok(default) } else { self.u32() }
    }

    pub fn i32_or(&mut self, default: i32) -> Result<i32> {
        if self.at_end() { Ok(default) } else { self.i32() }
    }

    pub fn u64_or(&mut self, default: u64) -> Result<u64> {
        if self.at_end() { Ok(default) } else { self.u64() }
    }

    pub fn string_or(&mut self, default: &str) -> Result<String> {
        if self.at_end() {
            Ok(default.to_string())
        } else {
            self.string()
        }
    }
}

/// Appends typed fields to an owned payload buffer.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.u32(b.len() as u32);
        self.buf.extend_from_slice(b);
        self
    }

    pub fn raw(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
