//! Built-in [`Transport`](crate::Transport) implementations.
//!
//! | Feature               | Transport              |
//! |-----------------------|------------------------|
//! | `transport-websocket` | [`WebSocketTransport`] |
//! | always available      | [`DatagramTransport`]  |
//!
//! The WebSocket transport dials a server directly. The datagram transport
//! wraps any [`DatagramSession`] implementation, so datagram-style carriers
//! (QUIC-like sessions, test doubles) plug in without touching the
//! connection manager.

pub mod datagram;
#[cfg(feature = "transport-websocket")]
pub mod websocket;

pub use datagram::{DatagramReader, DatagramSession, DatagramTransport, DatagramWriter};
#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
