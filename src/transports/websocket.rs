//! Stream-oriented transport over WebSocket, using `tokio-tungstenite`.
//!
//! Maps the socket's lifecycle onto the shared transport event surface:
//! `open` once the handshake completes, `message` per binary frame, `close`
//! with the server's `{code, reason}` preserved from the close frame, and
//! `error` for carrier failures (including a failed dial — a connection that
//! never establishes dispatches `error` without ever dispatching `open`).
//!
//! Both `ws://` and `wss://` URLs are supported; TLS is handled
//! transparently via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::error::{PresenceError, Result};
use crate::transport::{CloseEvent, ReadyState, Transport, TransportEvents};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum Outbound {
    Frame(Bytes),
    Close,
}

/// A [`Transport`] backed by a WebSocket connection.
pub struct WebSocketTransport {
    events: TransportEvents,
    state: Arc<Mutex<ReadyState>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl WebSocketTransport {
    /// Start dialing `url`. The returned transport is in
    /// [`ReadyState::Connecting`]; `open` is dispatched once the handshake
    /// completes.
    pub fn connect(url: impl Into<String>) -> Arc<Self> {
        let url = url.into();
        let (transport, events, state, outbound_rx) = Self::parts();
        tokio::spawn(async move {
            debug!(url = %url, "dialing WebSocket server");
            let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((stream, _response)) => stream,
                Err(err) => {
                    debug!(url = %url, %err, "WebSocket dial failed");
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    events.error.notify(format!("connect failed: {err}"));
                    return;
                }
            };
            drive(stream, events, state, outbound_rx).await;
        });
        transport
    }

    /// Wrap an already-established stream. `open` is dispatched as soon as
    /// the driving task runs.
    ///
    /// Useful when the handshake needs custom TLS configuration or headers
    /// that [`connect`](Self::connect) does not expose.
    pub fn from_stream(stream: WsStream) -> Arc<Self> {
        let (transport, events, state, outbound_rx) = Self::parts();
        tokio::spawn(drive(stream, events, state, outbound_rx));
        transport
    }

    #[allow(clippy::type_complexity)]
    fn parts() -> (
        Arc<Self>,
        TransportEvents,
        Arc<Mutex<ReadyState>>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let events = TransportEvents::new();
        let state = Arc::new(Mutex::new(ReadyState::Connecting));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            events: events.clone(),
            state: Arc::clone(&state),
            outbound,
        });
        (transport, events, state, outbound_rx)
    }
}

impl Transport for WebSocketTransport {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().expect("transport state poisoned")
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }

    fn send(&self, frame: Bytes) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(PresenceError::TransportSend("socket is not open".into()));
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| PresenceError::TransportSend("socket task ended".into()))
    }

    fn close(&self) {
        {
            let mut state = self.state.lock().expect("transport state poisoned");
            if matches!(*state, ReadyState::Closing | ReadyState::Closed) {
                return;
            }
            *state = ReadyState::Closing;
        }
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

async fn drive(
    stream: WsStream,
    events: TransportEvents,
    state: Arc<Mutex<ReadyState>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    *state.lock().expect("transport state poisoned") = ReadyState::Open;
    events.open.notify(());

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if let Err(err) = sink.send(Message::Binary(frame)).await {
                        warn!(%err, "WebSocket send failed");
                        *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                        events.error.notify(err.to_string());
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Binary(payload))) => events.message.notify(payload),
                Some(Ok(Message::Text(text))) => {
                    // The server speaks binary; tolerate text frames by
                    // passing the raw bytes through.
                    events.message.notify(Bytes::from(text.to_string().into_bytes()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let event = match frame {
                        Some(frame) => CloseEvent::new(
                            i32::from(u16::from(frame.code)),
                            frame.reason.to_string(),
                        ),
                        None => CloseEvent::new(1006, ""),
                    };
                    debug!(code = event.code, reason = %event.reason, "WebSocket closed by peer");
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    events.close.notify(event);
                    break;
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_))) => {}
                Some(Err(err)) => {
                    debug!(%err, "WebSocket receive error");
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    events.error.notify(err.to_string());
                    break;
                }
                None => {
                    debug!("WebSocket stream ended without close frame");
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    events.close.notify(CloseEvent::new(1006, ""));
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    /// Start a local WebSocket server running `handler` on the accepted
    /// connection, returning the URL to dial.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    async fn await_open(transport: &Arc<WebSocketTransport>) {
        let opened = Arc::new(Notify::new());
        let opened_cb = Arc::clone(&opened);
        let _sub = transport.events().open.subscribe(move |_| {
            opened_cb.notify_one();
        });
        if transport.ready_state() == ReadyState::Open {
            return;
        }
        tokio::time::timeout(std::time::Duration::from_secs(5), opened.notified())
            .await
            .expect("transport did not open");
    }

    #[tokio::test]
    async fn open_then_binary_messages_are_dispatched() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(Bytes::from_static(b"\x01\x02")))
                .await
                .unwrap();
            // Keep the connection alive until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let transport = WebSocketTransport::connect(url);
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_cb = Arc::clone(&received);
        let _sub = transport
            .events()
            .message
            .subscribe(move |b: &Bytes| received_cb.lock().unwrap().push(b.clone()));

        await_open(&transport).await;
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if !received.lock().unwrap().is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            *received.lock().unwrap(),
            vec![Bytes::from_static(b"\x01\x02")]
        );
    }

    #[tokio::test]
    async fn close_frame_preserves_code_and_reason() {
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;

        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::Library(4001),
                reason: "bad token".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let transport = WebSocketTransport::connect(url);
        let closes = Arc::new(Mutex::new(Vec::new()));
        let closes_cb = Arc::clone(&closes);
        let done = Arc::new(Notify::new());
        let done_cb = Arc::clone(&done);
        let _sub = transport.events().close.subscribe(move |ev: &CloseEvent| {
            closes_cb.lock().unwrap().push(ev.clone());
            done_cb.notify_one();
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), done.notified())
            .await
            .expect("no close event");

        assert_eq!(
            *closes.lock().unwrap(),
            vec![CloseEvent::new(4001, "bad token")]
        );
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn failed_dial_dispatches_error_and_never_open() {
        let transport = WebSocketTransport::connect("ws://127.0.0.1:1");
        let opened = Arc::new(AtomicBool::new(false));
        let opened_cb = Arc::clone(&opened);
        let _open_sub = transport.events().open.subscribe(move |_| {
            opened_cb.store(true, Ordering::SeqCst);
        });
        let errored = Arc::new(Notify::new());
        let errored_cb = Arc::clone(&errored);
        let _err_sub = transport.events().error.subscribe(move |_| {
            errored_cb.notify_one();
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), errored.notified())
            .await
            .expect("no error event");

        assert!(!opened.load(Ordering::SeqCst));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let transport = WebSocketTransport::connect("ws://127.0.0.1:1");
        let err = transport.send(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, PresenceError::TransportSend(_)));
    }
}
