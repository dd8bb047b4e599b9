//! MessagePack encoder.

use thiserror::Error;

use super::value::{Timestamp, Value};

/// Errors raised while encoding a [`Value`].
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    /// A string, binary, array or map exceeded the 32-bit length limit.
    #[error("collection of {0} elements exceeds the wire length limit")]
    TooLong(usize),

    /// A timestamp carried a nanosecond component of one billion or more.
    #[error("timestamp nanoseconds out of range: {0}")]
    InvalidTimestamp(u32),

    /// A value rejected by the serde bridge (non-string map key, etc.).
    #[error("{0}")]
    Unsupported(String),
}

impl serde::ser::Error for EncodeError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        EncodeError::Unsupported(msg.to_string())
    }
}

/// Encode a single value to bytes.
pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut enc = Encoder::new();
    enc.write_value(value)?;
    Ok(enc.into_bytes())
}

/// Streaming encoder over a single growable byte buffer.
///
/// Values written back to back concatenate into a valid stream; the frame
/// envelope uses this to nest an encoded payload inside a `pl` field.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Create an encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the encoder, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append one value, picking the narrowest tag for each element.
    pub fn write_value(&mut self, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Nil => self.buf.push(0xc0),
            Value::Bool(false) => self.buf.push(0xc2),
            Value::Bool(true) => self.buf.push(0xc3),
            Value::Int(n) => self.write_int(*n),
            Value::UInt(n) => self.write_uint(*n),
            Value::F32(x) => {
                self.buf.push(0xca);
                self.buf.extend_from_slice(&x.to_be_bytes());
            }
            Value::F64(x) => {
                self.buf.push(0xcb);
                self.buf.extend_from_slice(&x.to_be_bytes());
            }
            Value::Str(s) => self.write_str(s)?,
            Value::Bin(b) => self.write_bin(b)?,
            Value::Array(items) => {
                self.write_array_header(items.len())?;
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Map(entries) => {
                self.write_map_header(entries.len())?;
                for (key, item) in entries {
                    self.write_str(key)?;
                    self.write_value(item)?;
                }
            }
            Value::Timestamp(ts) => self.write_timestamp(*ts)?,
        }
        Ok(())
    }

    fn write_int(&mut self, n: i64) {
        if n >= 0 {
            // Non-negative signed integers use the unsigned family.
            self.write_uint(n as u64);
        } else if n >= -32 {
            self.buf.push(n as u8);
        } else if n >= i64::from(i8::MIN) {
            self.buf.push(0xd0);
            self.buf.push(n as u8);
        } else if n >= i64::from(i16::MIN) {
            self.buf.push(0xd1);
            self.buf.extend_from_slice(&(n as i16).to_be_bytes());
        } else if n >= i64::from(i32::MIN) {
            self.buf.push(0xd2);
            self.buf.extend_from_slice(&(n as i32).to_be_bytes());
        } else {
            // 64-bit values are written as a high/low pair of 32-bit words.
            self.buf.push(0xd3);
            self.write_split(n as u64);
        }
    }

    fn write_uint(&mut self, n: u64) {
        if n <= 0x7f {
            self.buf.push(n as u8);
        } else if n <= u64::from(u8::MAX) {
            self.buf.push(0xcc);
            self.buf.push(n as u8);
        } else if n <= u64::from(u16::MAX) {
            self.buf.push(0xcd);
            self.buf.extend_from_slice(&(n as u16).to_be_bytes());
        } else if n <= u64::from(u32::MAX) {
            self.buf.push(0xce);
            self.buf.extend_from_slice(&(n as u32).to_be_bytes());
        } else {
            self.buf.push(0xcf);
            self.write_split(n);
        }
    }

    /// High word first, then low word, both big-endian.
    fn write_split(&mut self, n: u64) {
        let hi = (n >> 32) as u32;
        let lo = n as u32;
        self.buf.extend_from_slice(&hi.to_be_bytes());
        self.buf.extend_from_slice(&lo.to_be_bytes());
    }

    fn write_str(&mut self, s: &str) -> Result<(), EncodeError> {
        let len = s.len();
        if len <= 31 {
            self.buf.push(0xa0 | len as u8);
        } else if len <= usize::from(u8::MAX) {
            self.buf.push(0xd9);
            self.buf.push(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.push(0xda);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else if u32::try_from(len).is_ok() {
            self.buf.push(0xdb);
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(EncodeError::TooLong(len));
        }
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_bin(&mut self, b: &[u8]) -> Result<(), EncodeError> {
        let len = b.len();
        if len <= usize::from(u8::MAX) {
            self.buf.push(0xc4);
            self.buf.push(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.push(0xc5);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else if u32::try_from(len).is_ok() {
            self.buf.push(0xc6);
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(EncodeError::TooLong(len));
        }
        self.buf.extend_from_slice(b);
        Ok(())
    }

    fn write_array_header(&mut self, len: usize) -> Result<(), EncodeError> {
        if len <= 15 {
            self.buf.push(0x90 | len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.push(0xdc);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else if u32::try_from(len).is_ok() {
            self.buf.push(0xdd);
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(EncodeError::TooLong(len));
        }
        Ok(())
    }

    fn write_map_header(&mut self, len: usize) -> Result<(), EncodeError> {
        if len <= 15 {
            self.buf.push(0x80 | len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.buf.push(0xde);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else if u32::try_from(len).is_ok() {
            self.buf.push(0xdf);
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(EncodeError::TooLong(len));
        }
        Ok(())
    }

    /// Timestamp ext −1 in its 32, 64 or 96-bit form, narrowest first.
    fn write_timestamp(&mut self, ts: Timestamp) -> Result<(), EncodeError> {
        if ts.nanos >= 1_000_000_000 {
            return Err(EncodeError::InvalidTimestamp(ts.nanos));
        }
        if ts.nanos == 0 && ts.secs >= 0 && ts.secs <= i64::from(u32::MAX) {
            // timestamp 32: fixext4
            self.buf.push(0xd4);
            self.buf.push((-1i8) as u8);
            self.buf.extend_from_slice(&(ts.secs as u32).to_be_bytes());
        } else if ts.secs >= 0 && ts.secs < (1i64 << 34) {
            // timestamp 64: fixext8, nanos in the top 30 bits
            let packed = (u64::from(ts.nanos) << 34) | ts.secs as u64;
            self.buf.push(0xd7);
            self.buf.push((-1i8) as u8);
            self.buf.extend_from_slice(&packed.to_be_bytes());
        } else {
            // timestamp 96: ext8 with a 12-byte body
            self.buf.push(0xc7);
            self.buf.push(12);
            self.buf.push((-1i8) as u8);
            self.buf.extend_from_slice(&ts.nanos.to_be_bytes());
            self.buf.extend_from_slice(&ts.secs.to_be_bytes());
        }
        Ok(())
    }
}
