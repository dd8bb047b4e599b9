//! # Custom Transport Example
//!
//! Shows how to plug a custom carrier into the client by implementing
//! [`DatagramSession`] and overriding the transport factory. This is useful
//! for:
//!
//! - **Testing** — run a fake server in-process, no sockets involved
//! - **Custom backends** — adapt any I/O layer (QUIC streams, WebRTC data
//!   channels, named pipes)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use presence_client::protocol::Frame;
use presence_client::transports::{
    DatagramReader, DatagramSession, DatagramTransport, DatagramWriter,
};
use presence_client::{ClientOptions, PresenceClient, Transport};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" session
// ─────────────────────────────────────────────────────────────────────

/// A loopback session that shuttles frames through in-process channels.
///
/// The **client half** implements [`DatagramSession`] and is wrapped by
/// [`DatagramTransport`]; the **server half** lets you inject frames and
/// read what the client sent.
struct LoopbackSession {
    /// Frames the client sends go here (server reads the other end).
    tx: mpsc::UnboundedSender<Bytes>,
    /// Frames the server sends arrive here (client reads them).
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// The "server side" of the loopback.
struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Bytes>,
}

fn loopback_pair() -> (LoopbackSession, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackSession {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the session traits
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl DatagramSession for LoopbackSession {
    /// Channels are usable immediately.
    async fn ready(&mut self) -> presence_client::Result<()> {
        Ok(())
    }

    fn open(self: Box<Self>) -> (Box<dyn DatagramWriter>, Box<dyn DatagramReader>) {
        (
            Box::new(LoopbackWriter { tx: self.tx }),
            Box::new(LoopbackReader { rx: self.rx }),
        )
    }
}

struct LoopbackWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl DatagramWriter for LoopbackWriter {
    async fn write(&mut self, frame: Bytes) -> presence_client::Result<()> {
        self.tx
            .send(frame)
            .map_err(|e| presence_client::PresenceError::TransportSend(e.to_string()))
    }

    async fn shutdown(&mut self) -> presence_client::Result<()> {
        Ok(())
    }
}

struct LoopbackReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl DatagramReader for LoopbackReader {
    async fn read(&mut self) -> presence_client::Result<Option<Bytes>> {
        // `None` (channel closed) is the graceful end of stream.
        Ok(self.rx.recv().await)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire together the client and the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (session, mut server) = loopback_pair();

    // Hand the session to the client through a one-shot factory override.
    let session = std::sync::Mutex::new(Some(session));
    let client = PresenceClient::new(
        ClientOptions::new("loopback://demo", "pk_demo", "loopback-user").with_transport_factory(
            Arc::new(move |_auth: Option<&str>| -> Arc<dyn Transport> {
                let session = session
                    .lock()
                    .expect("session slot poisoned")
                    .take()
                    .expect("loopback session supports a single connect");
                DatagramTransport::start(session)
            }),
        ),
    )?;

    let (room, lease) = client.join("demo-room");
    let _data_sub = room.events().data.subscribe(|message| {
        tracing::info!("[{}] {} → {:?}", message.peer, message.event, message.data);
    });

    // ── Fake server: acknowledge the join ───────────────────────────
    // The client sends channel_join as soon as the transport opens.
    let Some(first) = server.rx.recv().await else {
        return Err("server channel closed before channel_join was received".into());
    };
    let frame = Frame::decode(&first)?;
    tracing::info!("Server received: {frame:?}");

    // Echo the join back; the client answers with peer_online and its
    // state snapshot.
    server.tx.send(Frame::channel_join("demo-room").encode()?)?;

    let online = server.rx.recv().await.expect("peer_online frame");
    tracing::info!("Server received: {:?}", Frame::decode(&online)?);
    let state = server.rx.recv().await.expect("peer_state frame");
    tracing::info!("Server received: {:?}", Frame::decode(&state)?);

    // ── Clean shutdown ──────────────────────────────────────────────
    lease.leave();
    client.destroy().await;
    tracing::info!("Done — custom transport works!");
    Ok(())
}
