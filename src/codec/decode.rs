//! MessagePack decoder.

use thiserror::Error;

use super::value::{Timestamp, Value};

/// Nesting depth limit; frames this deep are hostile, not real traffic.
const MAX_DEPTH: usize = 64;

/// Errors raised while decoding wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended in the middle of a value.
    #[error("truncated input: needed {needed} more bytes")]
    Truncated {
        /// How many further bytes the current element required.
        needed: usize,
    },

    /// The reserved tag `0xc1` appeared in the input.
    #[error("reserved tag 0xc1 in input")]
    ReservedTag,

    /// A string element carried invalid UTF-8.
    #[error("invalid UTF-8 in string element")]
    InvalidUtf8,

    /// A map key was not a string.
    #[error("map key has non-string tag {tag:#04x}")]
    NonStringKey {
        /// The offending tag byte.
        tag: u8,
    },

    /// An extension element had a type this codec does not understand.
    #[error("unknown extension type {0}")]
    UnknownExt(i8),

    /// A timestamp extension had a body of the wrong width.
    #[error("timestamp extension with invalid length {0}")]
    InvalidTimestampLength(usize),

    /// Input continued past the end of the decoded value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// Nesting exceeded the supported depth.
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    DepthLimit,
}

/// Decode exactly one value, rejecting trailing bytes.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut dec = Decoder::new(bytes);
    let value = dec.read_value()?;
    let rest = dec.remaining();
    if rest > 0 {
        return Err(DecodeError::TrailingBytes(rest));
    }
    Ok(value)
}

/// Cursor-based decoder over a byte slice.
///
/// [`read_value`](Decoder::read_value) consumes one value and leaves the
/// cursor after it, so several concatenated values can be pulled from one
/// buffer.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read the next value from the buffer.
    pub fn read_value(&mut self) -> Result<Value, DecodeError> {
        self.read_value_at_depth(0)
    }

    fn read_value_at_depth(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth >= MAX_DEPTH {
            return Err(DecodeError::DepthLimit);
        }
        let tag = self.take_u8()?;
        match tag {
            // Positive fixint.
            0x00..=0x7f => Ok(Value::Int(i64::from(tag))),
            // Negative fixint.
            0xe0..=0xff => Ok(Value::Int(i64::from(tag as i8))),
            // fixmap / fixarray / fixstr.
            0x80..=0x8f => self.read_map(usize::from(tag & 0x0f), depth),
            0x90..=0x9f => self.read_array(usize::from(tag & 0x0f), depth),
            0xa0..=0xbf => self.read_str(usize::from(tag & 0x1f)),
            0xc0 => Ok(Value::Nil),
            0xc1 => Err(DecodeError::ReservedTag),
            0xc2 => Ok(Value::Bool(false)),
            0xc3 => Ok(Value::Bool(true)),
            // bin 8/16/32.
            0xc4 => {
                let len = usize::from(self.take_u8()?);
                Ok(Value::Bin(self.take_bytes(len)?.to_vec()))
            }
            0xc5 => {
                let len = usize::from(self.take_u16()?);
                Ok(Value::Bin(self.take_bytes(len)?.to_vec()))
            }
            0xc6 => {
                let len = self.take_u32()? as usize;
                Ok(Value::Bin(self.take_bytes(len)?.to_vec()))
            }
            // ext 8/16/32.
            0xc7 => {
                let len = usize::from(self.take_u8()?);
                self.read_ext(len)
            }
            0xc8 => {
                let len = usize::from(self.take_u16()?);
                self.read_ext(len)
            }
            0xc9 => {
                let len = self.take_u32()? as usize;
                self.read_ext(len)
            }
            // f32 / f64.
            0xca => {
                let raw = self.take_u32()?;
                Ok(Value::F32(f32::from_bits(raw)))
            }
            0xcb => {
                let bytes = self.take_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok(Value::F64(f64::from_be_bytes(raw)))
            }
            // uint 8/16/32/64.
            0xcc => Ok(Value::Int(i64::from(self.take_u8()?))),
            0xcd => Ok(Value::Int(i64::from(self.take_u16()?))),
            0xce => Ok(Value::Int(i64::from(self.take_u32()?))),
            0xcf => {
                // High/low 32-bit split: reconstruct by shifting the high
                // word up 32 bits.
                let hi = self.take_u32()?;
                let lo = self.take_u32()?;
                let n = (u64::from(hi) << 32) | u64::from(lo);
                Ok(Value::from(n))
            }
            // int 8/16/32/64.
            0xd0 => Ok(Value::Int(i64::from(self.take_u8()? as i8))),
            0xd1 => Ok(Value::Int(i64::from(self.take_u16()? as i16))),
            0xd2 => Ok(Value::Int(i64::from(self.take_u32()? as i32))),
            0xd3 => {
                let hi = self.take_u32()?;
                let lo = self.take_u32()?;
                let n = (i64::from(hi as i32) << 32) | i64::from(lo);
                Ok(Value::Int(n))
            }
            // fixext 1/2/4/8/16.
            0xd4 => self.read_ext(1),
            0xd5 => self.read_ext(2),
            0xd6 => self.read_ext(4),
            0xd7 => self.read_ext(8),
            0xd8 => self.read_ext(16),
            // str 8/16/32.
            0xd9 => {
                let len = usize::from(self.take_u8()?);
                self.read_str(len)
            }
            0xda => {
                let len = usize::from(self.take_u16()?);
                self.read_str(len)
            }
            0xdb => {
                let len = self.take_u32()? as usize;
                self.read_str(len)
            }
            // array 16/32.
            0xdc => {
                let len = usize::from(self.take_u16()?);
                self.read_array(len, depth)
            }
            0xdd => {
                let len = self.take_u32()? as usize;
                self.read_array(len, depth)
            }
            // map 16/32.
            0xde => {
                let len = usize::from(self.take_u16()?);
                self.read_map(len, depth)
            }
            0xdf => {
                let len = self.take_u32()? as usize;
                self.read_map(len, depth)
            }
        }
    }

    fn read_str(&mut self, len: usize) -> Result<Value, DecodeError> {
        let bytes = self.take_bytes(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(Value::Str(s.to_string()))
    }

    fn read_array(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        // Cap pre-allocation by what the buffer could possibly hold.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.read_value_at_depth(depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn read_map(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        let mut entries = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            let key_tag = *self
                .buf
                .get(self.pos)
                .ok_or(DecodeError::Truncated { needed: 1 })?;
            let key = match self.read_value_at_depth(depth + 1)? {
                Value::Str(s) => s,
                _ => return Err(DecodeError::NonStringKey { tag: key_tag }),
            };
            let value = self.read_value_at_depth(depth + 1)?;
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }

    fn read_ext(&mut self, len: usize) -> Result<Value, DecodeError> {
        let ext_type = self.take_u8()? as i8;
        if ext_type != -1 {
            return Err(DecodeError::UnknownExt(ext_type));
        }
        match len {
            4 => {
                let secs = self.take_u32()?;
                Ok(Value::Timestamp(Timestamp::new(i64::from(secs), 0)))
            }
            8 => {
                let bytes = self.take_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                let packed = u64::from_be_bytes(raw);
                let nanos = (packed >> 34) as u32;
                let secs = (packed & ((1u64 << 34) - 1)) as i64;
                Ok(Value::Timestamp(Timestamp::new(secs, nanos)))
            }
            12 => {
                let nanos = self.take_u32()?;
                let bytes = self.take_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                let secs = i64::from_be_bytes(raw);
                Ok(Value::Timestamp(Timestamp::new(secs, nanos)))
            }
            other => Err(DecodeError::InvalidTimestampLength(other)),
        }
    }

    fn take_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(DecodeError::Truncated { needed: 1 })?;
        self.pos += 1;
        Ok(b)
    }

    fn take_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                needed: len - self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}
