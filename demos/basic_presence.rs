//! # Basic Presence Example
//!
//! Demonstrates a complete presence client lifecycle:
//!
//! 1. Connect to a presence server via WebSocket
//! 2. Join a room and publish local state
//! 3. React to peers coming and going and to broadcasts
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a presence server on localhost:4100, then:
//! cargo run --example basic_presence
//!
//! # Override the server URL:
//! PRESENCE_URL=wss://my-server/v1 cargo run --example basic_presence
//! ```

use presence_client::{ClientOptions, PresenceClient, Status};

/// Default server URL when `PRESENCE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4100/v1";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("PRESENCE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");

    let client = PresenceClient::new(ClientOptions::new(url, "pk_demo", "rust-demo-user"))?;

    // ── Observers ───────────────────────────────────────────────────
    let _status_sub = client.status_changes().subscribe(|status: &Status| {
        tracing::info!("Status → {status:?}");
    });
    let _error_sub = client.protocol_errors().subscribe(|err| {
        tracing::error!("Protocol error [{}]: {}", err.code, err.message);
    });

    // ── Join a room ─────────────────────────────────────────────────
    let (room, lease) = client.join("demo-room");
    let _online_sub = room.events().peer_online.subscribe(|peer: &String| {
        tracing::info!("Peer online: {peer}");
    });
    let _offline_sub = room.events().peer_offline.subscribe(|peer: &String| {
        tracing::info!("Peer offline: {peer}");
    });
    let _state_sub = room.events().peer_state.subscribe(|update| {
        tracing::info!("Peer {} state: {:?}", update.peer, update.state);
    });
    let _data_sub = room.events().data.subscribe(|message| {
        tracing::info!(
            "[{}] {} → {:?}",
            message.peer,
            message.event,
            message.data
        );
    });

    // Publish our state and say hello. Both are queued until the
    // connection is up and then delivered in order.
    room.set_state(&serde_json::json!({ "cursor": null, "name": "RustDemo" }))?;
    room.broadcast("speak", &serde_json::json!({ "msg": "hello from Rust" }))?;

    // ── Wait for Ctrl+C ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    lease.leave();
    client.destroy().await;
    Ok(())
}
