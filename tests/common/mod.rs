#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Shared test utilities for presence client integration tests.
//!
//! Provides an event-surface [`MockTransport`] driven by the tests (open,
//! close, error and message events are dispatched explicitly), a
//! [`MockConnector`] transport factory recording every transport it built,
//! and helpers for frames and event collection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use presence_client::codec::{encode, Value};
use presence_client::manager::AuthenticateFn;
use presence_client::transport::TransportFactory;
use presence_client::{CloseEvent, EventSource, PresenceError, ReadyState, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// A transport whose events are dispatched by the test.
pub struct MockTransport {
    events: presence_client::TransportEvents,
    state: Mutex<ReadyState>,
    /// Frames the client handed to `send`.
    pub sent: Mutex<Vec<Bytes>>,
    /// Whether `close()` was called.
    pub closed: AtomicBool,
}

impl MockTransport {
    pub fn new(open: bool) -> Arc<Self> {
        Arc::new(Self {
            events: presence_client::TransportEvents::new(),
            state: Mutex::new(if open {
                ReadyState::Open
            } else {
                ReadyState::Connecting
            }),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn dispatch_open(&self) {
        *self.state.lock().unwrap() = ReadyState::Open;
        self.events.open.notify(());
    }

    pub fn dispatch_close(&self, code: i32, reason: &str) {
        *self.state.lock().unwrap() = ReadyState::Closed;
        self.events.close.notify(CloseEvent::new(code, reason));
    }

    pub fn dispatch_error(&self, message: &str) {
        self.events.error.notify(message.to_string());
    }

    pub fn dispatch_message(&self, frame: Bytes) {
        self.events.message.notify(frame);
    }

    /// Decoded copies of every frame the client sent.
    pub fn sent_frames(&self) -> Vec<presence_client::protocol::Frame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| presence_client::protocol::Frame::decode(bytes).expect("sent frame"))
            .collect()
    }
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    fn events(&self) -> &presence_client::TransportEvents {
        &self.events
    }

    fn send(&self, frame: Bytes) -> presence_client::Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(PresenceError::TransportSend("mock not open".into()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = ReadyState::Closed;
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Transport factory recording every transport it hands out.
#[derive(Clone)]
pub struct MockConnector {
    pub transports: Arc<Mutex<Vec<Arc<MockTransport>>>>,
    /// When set, transports are born open (no explicit `dispatch_open`
    /// needed).
    pub auto_open: bool,
}

impl MockConnector {
    pub fn new(auto_open: bool) -> Self {
        Self {
            transports: Arc::new(Mutex::new(Vec::new())),
            auto_open,
        }
    }

    pub fn factory(&self) -> TransportFactory {
        let transports = Arc::clone(&self.transports);
        let auto_open = self.auto_open;
        Arc::new(move |_auth: Option<&str>| -> Arc<dyn Transport> {
            let transport = MockTransport::new(auto_open);
            transports.lock().unwrap().push(Arc::clone(&transport));
            transport
        })
    }

    pub fn count(&self) -> usize {
        self.transports.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.transports.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<MockTransport> {
        let transports = self.transports.lock().unwrap();
        Arc::clone(transports.last().expect("no transport was created"))
    }
}

// ── Delegates ───────────────────────────────────────────────────────

/// Authenticate delegate resolving immediately, counting its invocations.
pub fn counting_auth(token: &str) -> (AuthenticateFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_inner = Arc::clone(&calls);
    let token = token.to_string();
    let delegate: AuthenticateFn = Arc::new(move || {
        calls_inner.fetch_add(1, Ordering::SeqCst);
        let token = token.clone();
        Box::pin(async move { Ok(token) })
    });
    (delegate, calls)
}

/// Authenticate delegate rejecting with a stop-retrying signal.
pub fn stop_retrying_auth(message: &str) -> AuthenticateFn {
    let message = message.to_string();
    Arc::new(move || {
        let message = message.clone();
        Box::pin(async move { Err(PresenceError::StopRetrying(message)) })
    })
}

/// Authenticate delegate that never resolves (exercises the auth timeout).
pub fn hanging_auth() -> AuthenticateFn {
    Arc::new(|| Box::pin(std::future::pending()))
}

// ── Server frames ───────────────────────────────────────────────────

/// Server acknowledgement of a channel join.
pub fn server_channel_join(channel: &str) -> Bytes {
    control_frame("channel_join", channel, None, None)
}

/// A peer announcing itself.
pub fn server_peer_online(channel: &str, peer: &str) -> Bytes {
    control_frame("peer_online", channel, Some(peer), None)
}

/// A peer leaving.
pub fn server_peer_offline(channel: &str, peer: &str) -> Bytes {
    control_frame("peer_offline", channel, Some(peer), None)
}

/// A peer publishing its state map.
pub fn server_peer_state(channel: &str, peer: &str, state: Value) -> Bytes {
    let payload = encode(&state).unwrap();
    control_frame("peer_state", channel, Some(peer), Some(payload))
}

/// An application broadcast from a peer.
pub fn server_data(channel: &str, peer: &str, event: &str, data: Value) -> Bytes {
    let envelope = Value::map([("event", Value::from(event)), ("data", data)]);
    let payload = encode(&envelope).unwrap();
    let entries = vec![
        ("t".to_string(), Value::from("data")),
        ("c".to_string(), Value::from(channel)),
        ("p".to_string(), Value::from(peer)),
        ("pl".to_string(), Value::Bin(payload)),
    ];
    Bytes::from(encode(&Value::Map(entries)).unwrap())
}

fn control_frame(op: &str, channel: &str, peer: Option<&str>, payload: Option<Vec<u8>>) -> Bytes {
    let mut entries = vec![
        ("t".to_string(), Value::from("control")),
        ("op".to_string(), Value::from(op)),
        ("c".to_string(), Value::from(channel)),
    ];
    if let Some(peer) = peer {
        entries.push(("p".to_string(), Value::from(peer)));
    }
    if let Some(payload) = payload {
        entries.push(("pl".to_string(), Value::Bin(payload)));
    }
    Bytes::from(encode(&Value::Map(entries)).unwrap())
}

// ── Event collection & pacing ───────────────────────────────────────

/// Subscribe to `source`, collecting every value into a shared vec.
pub fn collect<T: Clone + Send + 'static>(
    source: &EventSource<T>,
) -> (Arc<Mutex<Vec<T>>>, presence_client::Subscription<T>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);
    let sub = source.subscribe(move |value: &T| seen_cb.lock().unwrap().push(value.clone()));
    (seen, sub)
}

/// Let spawned tasks and the manager driver run without advancing time.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock, then settle.
pub async fn advance_ms(ms: u64) {
    tokio::time::advance(std::time::Duration::from_millis(ms)).await;
    settle().await;
}
