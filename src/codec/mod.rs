//! MessagePack wire codec.
//!
//! Every frame on the wire is one MessagePack-encoded value, and application
//! payloads nest further encoded values inside `pl` fields, so the codec is
//! shared between control frames and user data. [`Value`] is the
//! self-describing in-memory form; [`encode`] and [`decode`] convert between
//! it and bytes.
//!
//! Map entries preserve insertion order, the encoder always picks the
//! narrowest tag that fits, and 64-bit integers travel as a big-endian
//! high/low pair of 32-bit words (the same byte layout as the canonical
//! int64/uint64 encoding, so peers that reconstruct in floating point stay
//! compatible).
//!
//! # Example
//!
//! ```
//! use presence_client::codec::{decode, encode, Value};
//!
//! let v = Value::Map(vec![
//!     ("t".into(), Value::Str("data".into())),
//!     ("c".into(), Value::Str("room-1".into())),
//! ]);
//! let bytes = encode(&v).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), v);
//! ```

mod decode;
mod encode;
mod ser;
mod value;

pub use decode::{decode, DecodeError, Decoder};
pub use encode::{encode, EncodeError, Encoder};
pub use ser::to_value;
pub use value::{Timestamp, Value};
