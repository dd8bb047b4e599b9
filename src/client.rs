//! Presence client: channel multiplexing over one managed connection.
//!
//! [`PresenceClient`] owns exactly one [`ConnectionManager`] and multiplexes
//! named channels over it. Joining hands out a lease per caller; a channel
//! lives until its last lease is released. Outbound frames queue while the
//! connection is down and flush in order once it comes up, so application
//! code never cares about reconnects.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::{to_value, Value};
use crate::error::{PresenceError, Result};
use crate::event_source::{EventSource, Subscription};
use crate::manager::{
    AuthenticateFn, ConnectionManager, HostSignals, ManagerDelegates, ProtocolError, Status,
};
use crate::protocol::{ControlOp, DataEnvelope, Frame};
use crate::transport::TransportFactory;

const THROTTLE_MIN_MS: u64 = 16;
const THROTTLE_MAX_MS: u64 = 1000;
const THROTTLE_DEFAULT_MS: u64 = 100;

const LOST_TIMEOUT_MIN_MS: u64 = 200;
const LOST_TIMEOUT_MAX_MS: u64 = 30_000;
const LOST_TIMEOUT_DEFAULT_MS: u64 = 5000;

const BACKGROUND_KEEP_ALIVE_MIN_MS: u64 = 15_000;

// ── Options ─────────────────────────────────────────────────────────

/// Configuration for [`PresenceClient::new`].
///
/// Only `url`, `public_key` and `uid` are required. Numeric options are
/// validated against their documented bounds when the client is built;
/// out-of-range values fail fast with
/// [`PresenceError::Config`].
///
/// # Example
///
/// ```
/// use presence_client::ClientOptions;
///
/// let options = ClientOptions::new("wss://example.com/v1", "pk_live_1", "user-7")
///     .with_throttle_ms(50)
///     .with_auto_connect(false);
/// assert_eq!(options.throttle_ms, 50);
/// ```
#[derive(Clone)]
pub struct ClientOptions {
    /// Presence server endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Public key identifying the application.
    pub public_key: String,
    /// This client's peer id.
    pub uid: String,
    /// Peer-state coalescing interval, `16..=1000` ms. Defaults to 100.
    pub throttle_ms: u64,
    /// Reserved lost-connection promotion threshold, `200..=30000` ms
    /// (values below 1000 are accepted but not recommended). Defaults
    /// to 5000.
    pub lost_connection_timeout_ms: u64,
    /// Reserved background keep-alive window; must be at least 15000 ms
    /// when provided.
    pub background_keep_alive_timeout_ms: Option<u64>,
    /// Connect immediately on construction. Defaults to `true`.
    pub auto_connect: bool,
    /// Override for the authenticate delegate. Defaults to resolving the
    /// public key as the credential.
    pub authenticate: Option<AuthenticateFn>,
    /// Override for the transport factory. Defaults to dialing a WebSocket
    /// at the composed URL (requires the `transport-websocket` feature).
    pub transport_factory: Option<TransportFactory>,
}

impl ClientOptions {
    /// Options with the required fields and default tuning.
    pub fn new(
        url: impl Into<String>,
        public_key: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            public_key: public_key.into(),
            uid: uid.into(),
            throttle_ms: THROTTLE_DEFAULT_MS,
            lost_connection_timeout_ms: LOST_TIMEOUT_DEFAULT_MS,
            background_keep_alive_timeout_ms: None,
            auto_connect: true,
            authenticate: None,
            transport_factory: None,
        }
    }

    /// Set the peer-state coalescing interval in milliseconds.
    #[must_use]
    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    /// Set the lost-connection promotion threshold in milliseconds.
    #[must_use]
    pub fn with_lost_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.lost_connection_timeout_ms = timeout_ms;
        self
    }

    /// Set the background keep-alive window in milliseconds.
    #[must_use]
    pub fn with_background_keep_alive_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.background_keep_alive_timeout_ms = Some(timeout_ms);
        self
    }

    /// Enable or disable connecting on construction.
    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Replace the authenticate delegate.
    #[must_use]
    pub fn with_authenticate(mut self, authenticate: AuthenticateFn) -> Self {
        self.authenticate = Some(authenticate);
        self
    }

    /// Replace the transport factory.
    #[must_use]
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Check every numeric option against its documented bounds.
    ///
    /// [`PresenceClient::new`] runs this before any connection machinery is
    /// built; it is public so embedders can validate configuration early.
    ///
    /// # Errors
    ///
    /// [`PresenceError::Config`] naming the offending option.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(PresenceError::Config("url must not be empty".into()));
        }
        if self.uid.is_empty() {
            return Err(PresenceError::Config("uid must not be empty".into()));
        }
        if !(THROTTLE_MIN_MS..=THROTTLE_MAX_MS).contains(&self.throttle_ms) {
            return Err(PresenceError::Config(format!(
                "throttle must be within [{THROTTLE_MIN_MS}, {THROTTLE_MAX_MS}] ms, got {}",
                self.throttle_ms
            )));
        }
        if !(LOST_TIMEOUT_MIN_MS..=LOST_TIMEOUT_MAX_MS).contains(&self.lost_connection_timeout_ms)
        {
            return Err(PresenceError::Config(format!(
                "lostConnectionTimeout must be within [{LOST_TIMEOUT_MIN_MS}, {LOST_TIMEOUT_MAX_MS}] ms, got {}",
                self.lost_connection_timeout_ms
            )));
        }
        if self.lost_connection_timeout_ms < 1000 {
            warn!(
                timeout_ms = self.lost_connection_timeout_ms,
                "lostConnectionTimeout below the recommended 1000 ms"
            );
        }
        if let Some(keep_alive) = self.background_keep_alive_timeout_ms {
            if keep_alive < BACKGROUND_KEEP_ALIVE_MIN_MS {
                return Err(PresenceError::Config(format!(
                    "backgroundKeepAliveTimeout must be at least {BACKGROUND_KEEP_ALIVE_MIN_MS} ms, got {keep_alive}"
                )));
            }
        }
        Ok(())
    }

    /// The transport URL: the configured endpoint with the identifying
    /// query string appended.
    fn transport_url(&self) -> String {
        format!(
            "{}?publickey={}&id={}",
            self.url, self.public_key, self.uid
        )
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("uid", &self.uid)
            .field("throttle_ms", &self.throttle_ms)
            .field("auto_connect", &self.auto_connect)
            .finish()
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// A peer's published state update.
#[derive(Debug, Clone)]
pub struct PeerStateUpdate {
    /// The publishing peer.
    pub peer: String,
    /// Its state map.
    pub state: Value,
}

/// An application broadcast received on a channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Originating peer.
    pub peer: String,
    /// Application event name.
    pub event: String,
    /// Decoded payload.
    pub data: Value,
}

/// Per-channel observables.
#[derive(Debug, Clone, Default)]
pub struct ChannelEvents {
    /// A peer joined the channel.
    pub peer_online: EventSource<String>,
    /// A peer left the channel.
    pub peer_offline: EventSource<String>,
    /// A peer published its state.
    pub peer_state: EventSource<PeerStateUpdate>,
    /// An application broadcast arrived.
    pub data: EventSource<ChannelMessage>,
}

struct ChannelInner {
    id: String,
    client: Weak<ClientInner>,
    events: ChannelEvents,
    joined: AtomicBool,
    local_state: StdMutex<Option<Value>>,
    leases: StdMutex<HashSet<Uuid>>,
    last_state_send: StdMutex<Option<Instant>>,
    state_send_scheduled: AtomicBool,
}

/// A named room multiplexed over the shared connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// The channel id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The channel's observables.
    pub fn events(&self) -> &ChannelEvents {
        &self.inner.events
    }

    /// Broadcast a typed event to every peer on the channel.
    ///
    /// The frame is queued if the connection is down and delivered exactly
    /// once when it comes up.
    ///
    /// # Errors
    ///
    /// Fails when `data` cannot be represented in the wire format.
    pub fn broadcast<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        let envelope = DataEnvelope::new(event, to_value(data)?);
        let frame = Frame::data(self.inner.id.clone(), envelope.encode()?);
        let Some(client) = self.inner.client.upgrade() else {
            warn!(channel = %self.inner.id, "broadcast on a destroyed client; dropping frame");
            return Ok(());
        };
        client.enqueue(frame);
        Ok(())
    }

    /// Replace this client's state on the channel and publish it.
    ///
    /// Publishes are coalesced by the client's throttle interval; the
    /// latest state always wins.
    ///
    /// # Errors
    ///
    /// Fails when `state` cannot be represented in the wire format.
    pub fn set_state<T: Serialize + ?Sized>(&self, state: &T) -> Result<()> {
        let value = to_value(state)?;
        *self
            .inner
            .local_state
            .lock()
            .expect("channel state poisoned") = Some(value);
        if self.inner.joined.load(Ordering::SeqCst) {
            if let Some(client) = self.inner.client.upgrade() {
                client.schedule_state_publish(&self.inner);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("joined", &self.inner.joined.load(Ordering::SeqCst))
            .finish()
    }
}

/// One outstanding lease against a shared [`Channel`].
///
/// The channel is destroyed when its last lease is released. Releasing a
/// lease twice logs a warning and does nothing.
pub struct ChannelLease {
    client: Weak<ClientInner>,
    channel_id: String,
    token: Uuid,
    released: AtomicBool,
}

impl ChannelLease {
    /// Release this lease.
    pub fn leave(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            warn!(channel = %self.channel_id, "leave called more than once on the same lease");
            return;
        }
        let Some(client) = self.client.upgrade() else {
            return;
        };
        client.release_lease(&self.channel_id, self.token);
    }
}

impl fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelLease")
            .field("channel", &self.channel_id)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

// ── Client ──────────────────────────────────────────────────────────

struct ClientInner {
    uid: String,
    throttle: Duration,
    manager: ConnectionManager,
    channels: StdMutex<HashMap<String, Arc<ChannelInner>>>,
    queue: StdMutex<VecDeque<Frame>>,
}

/// Browser-style presence client: one connection, many channels.
pub struct PresenceClient {
    inner: Arc<ClientInner>,
    signals: HostSignals,
    // Dropped with the client, detaching it from the manager's streams.
    _status_sub: Subscription<Status>,
    _incoming_sub: Subscription<Bytes>,
}

impl PresenceClient {
    /// Validate `options`, build the connection manager and (unless
    /// `auto_connect` is off) start connecting.
    ///
    /// # Errors
    ///
    /// [`PresenceError::Config`] when an option is outside its documented
    /// bounds.
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let signals = HostSignals::new();
        let authenticate = options.authenticate.clone().unwrap_or_else(|| {
            let public_key = options.public_key.clone();
            Arc::new(move || {
                let public_key = public_key.clone();
                Box::pin(async move { Ok(public_key) })
            })
        });
        let make_transport = match options.transport_factory.clone() {
            Some(factory) => factory,
            None => default_transport_factory(options.transport_url())?,
        };
        let delegates = ManagerDelegates {
            authenticate,
            make_transport,
            allow_idle_while_hidden: Arc::new(move || false),
        };
        let manager = ConnectionManager::new(delegates, &signals);

        let inner = Arc::new(ClientInner {
            uid: options.uid.clone(),
            throttle: Duration::from_millis(options.throttle_ms),
            manager,
            channels: StdMutex::new(HashMap::new()),
            queue: StdMutex::new(VecDeque::new()),
        });

        let weak = Arc::downgrade(&inner);
        let status_sub = inner.manager.status_changes().subscribe(move |status| {
            let Some(inner) = weak.upgrade() else { return };
            if *status == Status::Connected {
                inner.flush_queue();
            } else {
                // The session is gone; every joined channel must redo its
                // handshake on the next connection.
                inner.mark_channels_for_rejoin();
            }
        });
        let weak = Arc::downgrade(&inner);
        let incoming_sub = inner.manager.incoming().subscribe(move |frame: &Bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(frame);
            }
        });

        if options.auto_connect {
            inner.manager.connect();
        }

        Ok(Self {
            inner,
            signals,
            _status_sub: status_sub,
            _incoming_sub: incoming_sub,
        })
    }

    /// Join a channel, creating it on first join. Returns the channel and a
    /// lease; the channel is destroyed when the last lease is released.
    pub fn join(&self, channel_id: impl Into<String>) -> (Channel, ChannelLease) {
        let channel_id = channel_id.into();
        let token = Uuid::new_v4();
        let channel = {
            let mut channels = self
                .inner
                .channels
                .lock()
                .expect("channel registry poisoned");
            if let Some(existing) = channels.get(&channel_id) {
                existing
                    .leases
                    .lock()
                    .expect("channel leases poisoned")
                    .insert(token);
                Arc::clone(existing)
            } else {
                debug!(channel = %channel_id, "creating channel");
                let created = Arc::new(ChannelInner {
                    id: channel_id.clone(),
                    client: Arc::downgrade(&self.inner),
                    events: ChannelEvents::default(),
                    joined: AtomicBool::new(false),
                    local_state: StdMutex::new(None),
                    leases: StdMutex::new(HashSet::from([token])),
                    last_state_send: StdMutex::new(None),
                    state_send_scheduled: AtomicBool::new(false),
                });
                channels.insert(channel_id.clone(), Arc::clone(&created));
                // Handshake step 1: ask the server to put us in the room.
                self.inner.enqueue(Frame::channel_join(channel_id.clone()));
                created
            }
        };
        (
            Channel { inner: channel },
            ChannelLease {
                client: Arc::downgrade(&self.inner),
                channel_id,
                token,
                released: AtomicBool::new(false),
            },
        )
    }

    /// Look up an existing channel by id.
    pub fn get_channel(&self, channel_id: &str) -> Option<Channel> {
        self.inner
            .channels
            .lock()
            .expect("channel registry poisoned")
            .get(channel_id)
            .map(|inner| Channel {
                inner: Arc::clone(inner),
            })
    }

    /// Purge the credential and reconnect; the authenticate delegate runs
    /// again before the next attempt.
    pub fn logout(&self) {
        self.inner.manager.logout();
    }

    /// Begin connecting (needed when built with `auto_connect` off).
    pub fn connect(&self) {
        self.inner.manager.connect();
    }

    /// Drop the connection without destroying channels; queued frames flush
    /// on the next connect.
    pub fn disconnect(&self) {
        self.inner.manager.disconnect();
    }

    /// Current connection status.
    pub fn status(&self) -> Status {
        self.inner.manager.status()
    }

    /// Notified on every status change.
    pub fn status_changes(&self) -> EventSource<Status> {
        self.inner.manager.status_changes()
    }

    /// Application-visible terminal errors.
    pub fn protocol_errors(&self) -> EventSource<ProtocolError> {
        self.inner.manager.protocol_errors()
    }

    /// Host signal sources for embedders to wire up (online, offline,
    /// visibility).
    pub fn host_signals(&self) -> &HostSignals {
        &self.signals
    }

    /// Tear the client down: destroy the manager and every channel.
    pub async fn destroy(&self) {
        self.inner.manager.destroy().await;
        self.inner
            .channels
            .lock()
            .expect("channel registry poisoned")
            .clear();
        self.inner
            .queue
            .lock()
            .expect("send queue poisoned")
            .clear();
    }
}

impl fmt::Debug for PresenceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceClient")
            .field("uid", &self.inner.uid)
            .field("status", &self.inner.manager.status())
            .field(
                "channels",
                &self
                    .inner
                    .channels
                    .lock()
                    .expect("channel registry poisoned")
                    .len(),
            )
            .finish()
    }
}

#[cfg(feature = "transport-websocket")]
fn default_transport_factory(url: String) -> Result<TransportFactory> {
    use crate::transports::WebSocketTransport;
    Ok(Arc::new(
        move |_auth: Option<&str>| -> Arc<dyn crate::Transport> {
            WebSocketTransport::connect(url.clone())
        },
    ))
}

#[cfg(not(feature = "transport-websocket"))]
fn default_transport_factory(_url: String) -> Result<TransportFactory> {
    Err(PresenceError::Config(
        "no default transport available; enable the `transport-websocket` \
         feature or provide a transport factory"
            .into(),
    ))
}

// ── Inner plumbing ──────────────────────────────────────────────────

impl ClientInner {
    /// Queue a frame, flushing immediately when connected.
    fn enqueue(&self, frame: Frame) {
        self.queue
            .lock()
            .expect("send queue poisoned")
            .push_back(frame);
        if self.manager.status() == Status::Connected {
            self.flush_queue();
        }
    }

    /// Drain the queue in FIFO order, encoding each frame just before it is
    /// handed to the transport. Stops (keeping the rest queued) if the
    /// connection drops mid-flush.
    fn flush_queue(&self) {
        loop {
            let frame = {
                let mut queue = self.queue.lock().expect("send queue poisoned");
                match queue.pop_front() {
                    Some(frame) => frame,
                    None => return,
                }
            };
            let bytes = match frame.encode() {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "dropping unencodable frame");
                    continue;
                }
            };
            if let Err(err) = self.manager.send(bytes) {
                debug!(error = %err, "connection dropped mid-flush; requeueing frame");
                self.queue
                    .lock()
                    .expect("send queue poisoned")
                    .push_front(frame);
                return;
            }
        }
    }

    /// Decode and route one incoming frame.
    fn dispatch(&self, bytes: &Bytes) {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "discarding undecodable frame");
                return;
            }
        };
        let channel = {
            let channels = self.channels.lock().expect("channel registry poisoned");
            channels.get(frame.channel()).cloned()
        };
        let Some(channel) = channel else {
            debug!(channel = frame.channel(), "frame for unknown channel");
            return;
        };

        match frame {
            Frame::Control {
                op: ControlOp::ChannelJoin,
                ..
            } => {
                // Handshake steps 2 and 3: announce ourselves, then publish
                // our state.
                if !channel.joined.swap(true, Ordering::SeqCst) {
                    debug!(channel = %channel.id, "channel joined");
                    self.enqueue(Frame::peer_online(channel.id.clone()));
                    self.publish_state_now(&channel);
                }
            }
            Frame::Control {
                op: ControlOp::PeerOnline,
                peer,
                ..
            } => {
                let Some(peer) = peer else { return };
                if peer == self.uid {
                    return;
                }
                channel.events.peer_online.notify(peer);
                // A newcomer has no view of us yet; sync our state outward.
                self.schedule_state_publish(&channel);
            }
            Frame::Control {
                op: ControlOp::PeerOffline,
                peer,
                ..
            } => {
                let Some(peer) = peer else { return };
                if peer == self.uid {
                    return;
                }
                channel.events.peer_offline.notify(peer);
            }
            Frame::Control {
                op: ControlOp::PeerState,
                peer,
                payload,
                ..
            } => {
                let Some(peer) = peer else { return };
                let Some(payload) = payload else { return };
                match crate::codec::decode(&payload) {
                    Ok(state) => channel
                        .events
                        .peer_state
                        .notify(PeerStateUpdate { peer, state }),
                    Err(err) => warn!(error = %err, "discarding undecodable peer state"),
                }
            }
            Frame::Data { peer, payload, .. } => {
                let peer = peer.unwrap_or_default();
                match DataEnvelope::decode(&payload) {
                    Ok(envelope) => channel.events.data.notify(ChannelMessage {
                        peer,
                        event: envelope.event,
                        data: envelope.data,
                    }),
                    Err(err) => warn!(error = %err, "discarding undecodable data payload"),
                }
            }
        }
    }

    /// Publish the channel's state immediately and record the send time.
    fn publish_state_now(&self, channel: &Arc<ChannelInner>) {
        let state = channel
            .local_state
            .lock()
            .expect("channel state poisoned")
            .clone()
            .unwrap_or(Value::Map(Vec::new()));
        let payload = match crate::codec::encode(&state) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(error = %err, "dropping unencodable channel state");
                return;
            }
        };
        *channel
            .last_state_send
            .lock()
            .expect("channel state poisoned") = Some(Instant::now());
        self.enqueue(Frame::peer_state(channel.id.clone(), payload));
    }

    /// Publish the channel's state, coalescing bursts into one send per
    /// throttle interval. The latest state at flush time wins.
    fn schedule_state_publish(&self, channel: &Arc<ChannelInner>) {
        let elapsed = channel
            .last_state_send
            .lock()
            .expect("channel state poisoned")
            .map(|at| at.elapsed());
        match elapsed {
            Some(elapsed) if elapsed < self.throttle => {
                if channel.state_send_scheduled.swap(true, Ordering::SeqCst) {
                    return;
                }
                let wait = self.throttle - elapsed;
                // The channel's back-pointer is this client.
                let client = Weak::clone(&channel.client);
                let channel = Arc::clone(channel);
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    channel.state_send_scheduled.store(false, Ordering::SeqCst);
                    if let Some(client) = client.upgrade() {
                        client.publish_state_now(&channel);
                    }
                });
            }
            _ => self.publish_state_now(channel),
        }
    }

    /// Queue a fresh `channel_join` for every channel whose handshake died
    /// with the connection.
    fn mark_channels_for_rejoin(&self) {
        let channels: Vec<Arc<ChannelInner>> = self
            .channels
            .lock()
            .expect("channel registry poisoned")
            .values()
            .cloned()
            .collect();
        for channel in channels {
            if channel.joined.swap(false, Ordering::SeqCst) {
                debug!(channel = %channel.id, "queueing channel rejoin");
                self.enqueue(Frame::channel_join(channel.id.clone()));
            }
        }
    }

    /// Remove one lease; destroy the channel when the last lease goes.
    fn release_lease(&self, channel_id: &str, token: Uuid) {
        let mut channels = self.channels.lock().expect("channel registry poisoned");
        let Some(channel) = channels.get(channel_id) else {
            return;
        };
        let remaining = {
            let mut leases = channel.leases.lock().expect("channel leases poisoned");
            leases.remove(&token);
            leases.len()
        };
        if remaining == 0 {
            debug!(channel = %channel_id, "last lease released; destroying channel");
            if let Some(channel) = channels.remove(channel_id) {
                channel.events.peer_online.clear();
                channel.events.peer_offline.clear();
                channel.events.peer_state.clear();
                channel.events.data.clear();
            }
        }
    }
}
