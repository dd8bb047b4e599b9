//! Datagram-oriented transport.
//!
//! Normalizes any [`DatagramSession`] onto the shared transport event
//! surface. The session is considered unusable until `ready` resolves:
//! reader and writer handles are opened only then, and `open` is dispatched
//! at that point. A failed `ready`, a read error and a graceful end of
//! stream are all terminal; `open` is never dispatched after any of them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{PresenceError, Result};
use crate::transport::{CloseEvent, ReadyState, Transport, TransportEvents};

/// A datagram-style session that becomes usable once `ready` resolves.
#[async_trait]
pub trait DatagramSession: Send + 'static {
    /// Resolves when the session can carry frames, or fails terminally.
    async fn ready(&mut self) -> Result<()>;

    /// Split into writer and reader handles. Called exactly once, after
    /// [`ready`](DatagramSession::ready) resolves.
    fn open(self: Box<Self>) -> (Box<dyn DatagramWriter>, Box<dyn DatagramReader>);
}

/// Write half of an open session.
#[async_trait]
pub trait DatagramWriter: Send + 'static {
    /// Transmit one frame.
    async fn write(&mut self, frame: Bytes) -> Result<()>;

    /// Initiate session close.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Read half of an open session.
#[async_trait]
pub trait DatagramReader: Send + 'static {
    /// Next received chunk; `Ok(None)` when the peer finished the stream.
    async fn read(&mut self) -> Result<Option<Bytes>>;
}

enum Outbound {
    Frame(Bytes),
    Close,
}

/// [`Transport`] over a [`DatagramSession`].
pub struct DatagramTransport {
    events: TransportEvents,
    state: Arc<Mutex<ReadyState>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl DatagramTransport {
    /// Start driving `session` and return the transport handle.
    ///
    /// The returned transport is in [`ReadyState::Connecting`] until the
    /// session reports ready.
    pub fn start(session: impl DatagramSession) -> Arc<Self> {
        let events = TransportEvents::new();
        let state = Arc::new(Mutex::new(ReadyState::Connecting));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            events: events.clone(),
            state: Arc::clone(&state),
            outbound,
        });
        tokio::spawn(drive(Box::new(session), events, state, outbound_rx));
        transport
    }
}

impl Transport for DatagramTransport {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().expect("transport state poisoned")
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }

    fn send(&self, frame: Bytes) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(PresenceError::TransportSend(
                "datagram session is not open".into(),
            ));
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| PresenceError::TransportSend("datagram session ended".into()))
    }

    fn close(&self) {
        {
            let mut state = self.state.lock().expect("transport state poisoned");
            if matches!(*state, ReadyState::Closing | ReadyState::Closed) {
                return;
            }
            *state = ReadyState::Closing;
        }
        // Stale consumers must not see events from a close they initiated.
        self.events.close.clear();
        self.events.error.clear();
        self.events.message.clear();
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl std::fmt::Debug for DatagramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramTransport")
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

async fn drive(
    mut session: Box<dyn DatagramSession>,
    events: TransportEvents,
    state: Arc<Mutex<ReadyState>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    if let Err(err) = session.ready().await {
        debug!(%err, "datagram session failed before ready");
        *state.lock().expect("transport state poisoned") = ReadyState::Closed;
        events.error.notify(err.to_string());
        return;
    }

    // Reader/writer handles exist only from here on.
    let (mut writer, mut reader) = session.open();
    *state.lock().expect("transport state poisoned") = ReadyState::Open;
    events.open.notify(());

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if let Err(err) = writer.write(frame).await {
                        warn!(%err, "datagram write failed");
                        *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                        events.error.notify(err.to_string());
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    break;
                }
            },
            chunk = reader.read() => match chunk {
                Ok(Some(bytes)) => events.message.notify(bytes),
                Ok(None) => {
                    debug!("datagram read loop finished");
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    events.close.notify(CloseEvent::new(0, ""));
                    break;
                }
                Err(err) => {
                    debug!(%err, "datagram read error");
                    *state.lock().expect("transport state poisoned") = ReadyState::Closed;
                    events.error.notify(err.to_string());
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
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedSession {
        ready_result: Result<()>,
        chunks: VecDeque<Result<Option<Bytes>>>,
        written: Arc<Mutex<Vec<Bytes>>>,
        shut_down: Arc<AtomicBool>,
    }

    struct ScriptedWriter {
        written: Arc<Mutex<Vec<Bytes>>>,
        shut_down: Arc<AtomicBool>,
    }

    struct ScriptedReader {
        chunks: VecDeque<Result<Option<Bytes>>>,
    }

    #[async_trait]
    impl DatagramSession for ScriptedSession {
        async fn ready(&mut self) -> Result<()> {
            self.ready_result.clone()
        }

        fn open(self: Box<Self>) -> (Box<dyn DatagramWriter>, Box<dyn DatagramReader>) {
            (
                Box::new(ScriptedWriter {
                    written: self.written,
                    shut_down: self.shut_down,
                }),
                Box::new(ScriptedReader {
                    chunks: self.chunks,
                }),
            )
        }
    }

    #[async_trait]
    impl DatagramWriter for ScriptedWriter {
        async fn write(&mut self, frame: Bytes) -> Result<()> {
            self.written.lock().unwrap().push(frame);
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<()> {
            self.shut_down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl DatagramReader for ScriptedReader {
        async fn read(&mut self) -> Result<Option<Bytes>> {
            match self.chunks.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }
    }

    fn scripted(
        chunks: Vec<Result<Option<Bytes>>>,
    ) -> (ScriptedSession, Arc<Mutex<Vec<Bytes>>>, Arc<AtomicBool>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let shut_down = Arc::new(AtomicBool::new(false));
        (
            ScriptedSession {
                ready_result: Ok(()),
                chunks: VecDeque::from(chunks),
                written: Arc::clone(&written),
                shut_down: Arc::clone(&shut_down),
            },
            written,
            shut_down,
        )
    }

    #[tokio::test]
    async fn open_fires_after_ready_and_chunks_become_messages() {
        let (session, _written, _shut) = scripted(vec![Ok(Some(Bytes::from_static(b"one")))]);
        let transport = DatagramTransport::start(session);

        let opened = Arc::new(AtomicBool::new(false));
        let opened_cb = Arc::clone(&opened);
        let _open_sub = transport.events().open.subscribe(move |_| {
            opened_cb.store(true, Ordering::SeqCst);
        });
        let messages = Arc::new(Mutex::new(Vec::new()));
        let messages_cb = Arc::clone(&messages);
        let _msg_sub = transport
            .events()
            .message
            .subscribe(move |b: &Bytes| messages_cb.lock().unwrap().push(b.clone()));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(opened.load(Ordering::SeqCst));
        assert_eq!(transport.ready_state(), ReadyState::Open);
        assert_eq!(*messages.lock().unwrap(), vec![Bytes::from_static(b"one")]);
    }

    #[tokio::test]
    async fn read_done_dispatches_silent_close() {
        let (session, _written, _shut) = scripted(vec![Ok(None)]);
        let transport = DatagramTransport::start(session);

        let closes = Arc::new(Mutex::new(Vec::new()));
        let closes_cb = Arc::clone(&closes);
        let _close_sub = transport
            .events()
            .close
            .subscribe(move |ev: &CloseEvent| closes_cb.lock().unwrap().push(ev.clone()));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(*closes.lock().unwrap(), vec![CloseEvent::new(0, "")]);
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn failed_ready_is_terminal_and_never_opens() {
        let session = ScriptedSession {
            ready_result: Err(PresenceError::Transport("refused".into())),
            chunks: VecDeque::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            shut_down: Arc::new(AtomicBool::new(false)),
        };
        let transport = DatagramTransport::start(session);

        let opened = Arc::new(AtomicBool::new(false));
        let opened_cb = Arc::clone(&opened);
        let _open_sub = transport.events().open.subscribe(move |_| {
            opened_cb.store(true, Ordering::SeqCst);
        });
        let errored = Arc::new(AtomicBool::new(false));
        let errored_cb = Arc::clone(&errored);
        let _err_sub = transport.events().error.subscribe(move |_| {
            errored_cb.store(true, Ordering::SeqCst);
        });

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(!opened.load(Ordering::SeqCst));
        assert!(errored.load(Ordering::SeqCst));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn close_clears_subscribers_and_shuts_the_session_down() {
        let (session, _written, shut_down) = scripted(vec![]);
        let transport = DatagramTransport::start(session);
        tokio::task::yield_now().await;

        let saw_close = Arc::new(AtomicBool::new(false));
        let saw_close_cb = Arc::clone(&saw_close);
        let _close_sub = transport.events().close.subscribe(move |_| {
            saw_close_cb.store(true, Ordering::SeqCst);
        });

        transport.close();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(shut_down.load(Ordering::SeqCst));
        // The subscriber list was cleared before the close went out.
        assert!(!saw_close.load(Ordering::SeqCst));
        assert_eq!(transport.events().close.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let (session, _written, _shut) = scripted(vec![]);
        let transport = DatagramTransport::start(session);
        // Do not yield: the session has not reported ready yet.
        let err = transport.send(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, PresenceError::TransportSend(_)));
    }
}
