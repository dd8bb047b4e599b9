//! Transport abstraction: one event surface over different carriers.
//!
//! The connection manager never talks to a socket directly; it observes the
//! four event streams of a [`Transport`] and writes frames through
//! [`send`](Transport::send). Both the stream-oriented WebSocket transport
//! and the datagram-oriented session transport normalize onto this surface,
//! so the state machine is carrier-agnostic.
//!
//! A transport is single-session: it is created by the manager's transport
//! factory, dispatches `open` at most once, and is closed by the manager
//! when the connection leaves the connected state group. After a close or
//! error event the transport is dead; it never dispatches `open` afterwards.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::event_source::EventSource;

/// Connection readiness, mirrored from the underlying carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The session is being established; no frame may be sent yet.
    Connecting,
    /// The session is live.
    Open,
    /// A close was initiated but has not completed.
    Closing,
    /// The session is finished.
    Closed,
}

/// Payload of a transport `close` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Carrier close code; `0` for a silent end-of-stream.
    pub code: i32,
    /// Close reason, possibly empty.
    pub reason: String,
}

impl CloseEvent {
    /// Build a close event.
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "close code {}", self.code)
        } else {
            write!(f, "close code {}: {}", self.code, self.reason)
        }
    }
}

/// The four event streams every transport exposes.
#[derive(Debug, Clone, Default)]
pub struct TransportEvents {
    /// Dispatched once when the session becomes usable.
    pub open: EventSource<()>,
    /// Dispatched when the session ends, with the carrier's code/reason.
    pub close: EventSource<CloseEvent>,
    /// Dispatched on carrier errors; the session may or may not survive.
    pub error: EventSource<String>,
    /// Dispatched per received frame with the raw bytes.
    pub message: EventSource<Bytes>,
}

impl TransportEvents {
    /// Fresh event surface with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A single-session bidirectional byte-frame carrier.
pub trait Transport: Send + Sync + 'static {
    /// Current readiness of the underlying session.
    fn ready_state(&self) -> ReadyState;

    /// The event surface observers subscribe to.
    fn events(&self) -> &TransportEvents;

    /// Queue one frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::TransportSend`](crate::PresenceError::TransportSend)
    /// when the session can no longer carry frames.
    fn send(&self, frame: Bytes) -> Result<()>;

    /// Tear the session down. Idempotent.
    fn close(&self);
}

/// Factory delegate the manager uses to construct a new transport per
/// connection attempt. Receives the current credential, when one exists;
/// factories that put the credential in the URL or first frame read it here.
pub type TransportFactory = Arc<dyn Fn(Option<&str>) -> Arc<dyn Transport> + Send + Sync>;
