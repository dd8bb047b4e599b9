//! # Presence Client
//!
//! Client runtime for a realtime presence protocol: one resilient
//! connection to a presence server, multiplexing named channels with typed
//! broadcasts and peer lifecycle events on top of it.
//!
//! ## Features
//!
//! - **Resilient connection** — a deterministic state machine drives
//!   authentication, transport opening, exponential backoff and host
//!   online/visibility signals; transient losses reconnect silently
//! - **Transport-agnostic** — one event surface over stream-oriented
//!   (WebSocket) and datagram-oriented carriers; implement [`Transport`]
//!   or [`transports::DatagramSession`] for custom backends
//! - **Binary wire format** — a self-contained MessagePack codec shared by
//!   control frames and application payloads
//! - **Channel multiplexing** — join named rooms, broadcast typed events,
//!   observe peers coming and going, without caring about reconnects
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # async fn example() -> presence_client::Result<()> {
//! use presence_client::{ClientOptions, PresenceClient};
//!
//! let client = PresenceClient::new(ClientOptions::new(
//!     "wss://presence.example.com/v1",
//!     "pk_live_1",
//!     "user-7",
//! ))?;
//!
//! let (room, lease) = client.join("room-1");
//! let _sub = room.events().peer_online.subscribe(|peer| {
//!     println!("{peer} is here");
//! });
//! room.broadcast("speak", &serde_json::json!({ "msg": "world" }))?;
//!
//! // later
//! lease.leave();
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod codec;
pub mod error;
pub mod event_source;
pub mod fsm;
pub mod manager;
pub mod protocol;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{
    Channel, ChannelEvents, ChannelLease, ChannelMessage, ClientOptions, PeerStateUpdate,
    PresenceClient,
};
pub use error::{PresenceError, Result};
pub use event_source::{EventSource, Subscription};
pub use manager::{ConnectionManager, HostSignals, ManagerDelegates, ProtocolError, Status};
pub use transport::{CloseEvent, ReadyState, Transport, TransportEvents};
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
