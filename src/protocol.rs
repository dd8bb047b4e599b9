//! Wire-compatible frame envelope for the presence protocol.
//!
//! Every frame on the wire is one MessagePack map. Control frames are
//! `{t: "control", op, c, p?, pl?}`; data frames are `{t: "data", c, p?,
//! pl}` where `pl` nests another encoded value holding `{event, data}`.
//! Optional fields are omitted from the map, never written as nil.

use bytes::Bytes;

use crate::codec::{decode, encode, Value};
use crate::error::{PresenceError, Result};

/// Recognized control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// Server acknowledgement (or client request) of a channel join.
    ChannelJoin,
    /// A peer announced itself on a channel.
    PeerOnline,
    /// A peer left a channel.
    PeerOffline,
    /// A peer published its state map.
    PeerState,
}

impl ControlOp {
    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlOp::ChannelJoin => "channel_join",
            ControlOp::PeerOnline => "peer_online",
            ControlOp::PeerOffline => "peer_offline",
            ControlOp::PeerState => "peer_state",
        }
    }

    fn from_str(op: &str) -> Option<Self> {
        match op {
            "channel_join" => Some(ControlOp::ChannelJoin),
            "peer_online" => Some(ControlOp::PeerOnline),
            "peer_offline" => Some(ControlOp::PeerOffline),
            "peer_state" => Some(ControlOp::PeerState),
            _ => None,
        }
    }
}

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A protocol control frame.
    Control {
        /// The control operation.
        op: ControlOp,
        /// Channel id the frame is addressed to.
        channel: String,
        /// Originating peer, when the server attributes one.
        peer: Option<String>,
        /// Nested encoded payload (peer state maps).
        payload: Option<Bytes>,
    },
    /// An application data frame.
    Data {
        /// Channel id the frame is addressed to.
        channel: String,
        /// Originating peer, when the server attributes one.
        peer: Option<String>,
        /// Nested encoded `{event, data}` payload.
        payload: Bytes,
    },
}

impl Frame {
    /// Client-side `channel_join` request for `channel`.
    pub fn channel_join(channel: impl Into<String>) -> Self {
        Frame::Control {
            op: ControlOp::ChannelJoin,
            channel: channel.into(),
            peer: None,
            payload: None,
        }
    }

    /// Client-side `peer_online` announcement on `channel`.
    pub fn peer_online(channel: impl Into<String>) -> Self {
        Frame::Control {
            op: ControlOp::PeerOnline,
            channel: channel.into(),
            peer: None,
            payload: None,
        }
    }

    /// Client-side `peer_state` publication carrying the encoded state map.
    pub fn peer_state(channel: impl Into<String>, payload: Bytes) -> Self {
        Frame::Control {
            op: ControlOp::PeerState,
            channel: channel.into(),
            peer: None,
            payload: Some(payload),
        }
    }

    /// Application broadcast on `channel` carrying an encoded
    /// `{event, data}` envelope.
    pub fn data(channel: impl Into<String>, payload: Bytes) -> Self {
        Frame::Data {
            channel: channel.into(),
            peer: None,
            payload,
        }
    }

    /// Channel id this frame is addressed to.
    pub fn channel(&self) -> &str {
        match self {
            Frame::Control { channel, .. } | Frame::Data { channel, .. } => channel,
        }
    }

    /// Encode the envelope to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let mut entries: Vec<(String, Value)> = Vec::with_capacity(5);
        match self {
            Frame::Control {
                op,
                channel,
                peer,
                payload,
            } => {
                entries.push(("t".into(), Value::from("control")));
                entries.push(("op".into(), Value::from(op.as_str())));
                entries.push(("c".into(), Value::from(channel.as_str())));
                if let Some(peer) = peer {
                    entries.push(("p".into(), Value::from(peer.as_str())));
                }
                if let Some(payload) = payload {
                    entries.push(("pl".into(), Value::Bin(payload.to_vec())));
                }
            }
            Frame::Data {
                channel,
                peer,
                payload,
            } => {
                entries.push(("t".into(), Value::from("data")));
                entries.push(("c".into(), Value::from(channel.as_str())));
                if let Some(peer) = peer {
                    entries.push(("p".into(), Value::from(peer.as_str())));
                }
                entries.push(("pl".into(), Value::Bin(payload.to_vec())));
            }
        }
        Ok(Bytes::from(encode(&Value::Map(entries))?))
    }

    /// Decode one envelope from wire bytes.
    ///
    /// # Errors
    ///
    /// [`PresenceError::Decode`] when the bytes are not valid MessagePack,
    /// [`PresenceError::MalformedFrame`] when the decoded value does not
    /// follow the envelope schema.
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let value = decode(bytes)?;
        let tag = required_str(&value, "t")?;
        let channel = required_str(&value, "c")?.to_string();
        let peer = optional_str(&value, "p")?;
        match tag {
            "control" => {
                let op_name = required_str(&value, "op")?;
                let op = ControlOp::from_str(op_name).ok_or_else(|| {
                    PresenceError::MalformedFrame(format!("unknown control op {op_name:?}"))
                })?;
                Ok(Frame::Control {
                    op,
                    channel,
                    peer,
                    payload: optional_bytes(&value, "pl")?,
                })
            }
            "data" => {
                let payload = optional_bytes(&value, "pl")?.ok_or_else(|| {
                    PresenceError::MalformedFrame("data frame without pl".into())
                })?;
                Ok(Frame::Data {
                    channel,
                    peer,
                    payload,
                })
            }
            other => Err(PresenceError::MalformedFrame(format!(
                "unknown frame tag {other:?}"
            ))),
        }
    }
}

/// Nested payload of a data frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEnvelope {
    /// Application event name.
    pub event: String,
    /// Application payload.
    pub data: Value,
}

impl DataEnvelope {
    /// Build an envelope.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Encode to the bytes nested in a data frame's `pl` field.
    pub fn encode(&self) -> Result<Bytes> {
        let value = Value::Map(vec![
            ("event".into(), Value::from(self.event.as_str())),
            ("data".into(), self.data.clone()),
        ]);
        Ok(Bytes::from(encode(&value)?))
    }

    /// Decode from a data frame's `pl` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = decode(bytes)?;
        let event = required_str(&value, "event")?.to_string();
        let data = value
            .get("data")
            .cloned()
            .ok_or_else(|| PresenceError::MalformedFrame("data envelope without data".into()))?;
        Ok(Self { event, data })
    }
}

fn required_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PresenceError::MalformedFrame(format!("missing string field {key:?}")))
}

fn optional_str(value: &Value, key: &str) -> Result<Option<String>> {
    match value.get(key) {
        None => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(_) => Err(PresenceError::MalformedFrame(format!(
            "field {key:?} is not a string"
        ))),
    }
}

fn optional_bytes(value: &Value, key: &str) -> Result<Option<Bytes>> {
    match value.get(key) {
        None => Ok(None),
        Some(Value::Bin(b)) => Ok(Some(Bytes::from(b.clone()))),
        Some(_) => Err(PresenceError::MalformedFrame(format!(
            "field {key:?} is not binary"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_round_trips() {
        let frame = Frame::channel_join("room-1");
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn optional_fields_are_omitted_from_the_map() {
        let frame = Frame::peer_online("room-1");
        let bytes = frame.encode().unwrap();
        let value = decode(&bytes).unwrap();
        assert!(value.get("p").is_none());
        assert!(value.get("pl").is_none());
        assert_eq!(value.get("op"), Some(&Value::from("peer_online")));
    }

    #[test]
    fn data_frame_nests_an_encoded_envelope() {
        let envelope = DataEnvelope::new(
            "speak",
            Value::map([("msg", Value::from("world"))]),
        );
        let frame = Frame::data("room-1", envelope.encode().unwrap());
        let bytes = frame.encode().unwrap();

        match Frame::decode(&bytes).unwrap() {
            Frame::Data { channel, payload, .. } => {
                assert_eq!(channel, "room-1");
                let decoded = DataEnvelope::decode(&payload).unwrap();
                assert_eq!(decoded, envelope);
            }
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn unknown_op_is_rejected() {
        let value = Value::map([
            ("t", Value::from("control")),
            ("op", Value::from("mystery")),
            ("c", Value::from("room-1")),
        ]);
        let bytes = encode(&value).unwrap();
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(err, PresenceError::MalformedFrame(_)));
    }

    #[test]
    fn data_frame_without_payload_is_rejected() {
        let value = Value::map([("t", Value::from("data")), ("c", Value::from("r"))]);
        let bytes = encode(&value).unwrap();
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(err, PresenceError::MalformedFrame(_)));
    }
}
