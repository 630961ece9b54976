//! Chromium pickle framing used by the archive preamble.
//!
//! A pickle is a little-endian `u32` payload size followed by the payload.
//! Values inside the payload are aligned to 4 bytes.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::HeaderError;

const ALIGNMENT: usize = 4;

#[inline]
fn align(len: usize) -> usize {
    len.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// Read exactly `len` bytes, reporting how many were available on a short read.
pub fn read_block<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, HeaderError>
where
    R: Read,
{
    let mut buf = Vec::with_capacity(len.min(1 << 20));
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(HeaderError::Truncated {
            expected: len,
            found: buf.len(),
        });
    }
    Ok(buf)
}

pub struct PickleReader<'a> {
    payload: &'a [u8],
}

impl<'a> PickleReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, HeaderError> {
        if data.len() < 4 {
            return Err(HeaderError::InvalidPickle("missing payload size"));
        }
        let payload_size = LittleEndian::read_u32(&data[..4]) as usize;
        let payload = &data[4..];
        if payload_size > payload.len() {
            return Err(HeaderError::InvalidPickle("payload size exceeds pickle"));
        }
        Ok(Self {
            payload: &payload[..payload_size],
        })
    }

    pub fn read_u32(&mut self) -> Result<u32, HeaderError> {
        if self.payload.len() < 4 {
            return Err(HeaderError::InvalidPickle("not enough data for u32"));
        }
        let value = LittleEndian::read_u32(&self.payload[..4]);
        self.payload = &self.payload[4..];
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<&'a str, HeaderError> {
        let len = self.read_u32()? as usize;
        if len > self.payload.len() {
            return Err(HeaderError::InvalidPickle("string length exceeds payload"));
        }
        let (bytes, rest) = self.payload.split_at(len);
        // trailing padding may be cut short by the payload size
        self.payload = &rest[(align(len) - len).min(rest.len())..];
        std::str::from_utf8(bytes).map_err(|_| HeaderError::InvalidUtf8)
    }
}

#[derive(Debug, Default)]
pub struct PickleWriter {
    payload: Vec<u8>,
}

impl PickleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.payload.extend_from_slice(&buf);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.payload.extend_from_slice(value.as_bytes());
        self.payload.resize(align(self.payload.len()), 0);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.payload.len());
        let mut size = [0u8; 4];
        LittleEndian::write_u32(&mut size, self.payload.len() as u32);
        out.extend_from_slice(&size);
        out.extend_from_slice(&self.payload);
        out
    }
}
