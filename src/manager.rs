//! Resilient connection manager.
//!
//! Owns the single transport session and drives it through a nine-state
//! machine: three idle states, an authentication pair, a connecting pair and
//! the connected (OK) group. Transient failures re-enter through backoff
//! tiers; server refusals and stop-retrying signals land in the terminal
//! failed state, which only an explicit reconnect leaves.
//!
//! The machine runs on a background driver task. Application code talks to
//! it through [`ConnectionManager`]'s methods and observes it through the
//! `status`, `incoming` and `protocol_errors` event sources. The incoming
//! source starts paused and is unpaused one scheduler turn after the
//! connection opens, so frames that race the open are delivered only after
//! the connected status notification has been observed.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff;
use crate::error::{PresenceError, Result, CLIENT_ERROR_CODE};
use crate::event_source::{EventSource, Subscription};
use crate::fsm::{Cleanup, Event, MachineHandle, Patch, Selector, State, StateMachine, Transition};
use crate::transport::{CloseEvent, ReadyState, Transport, TransportFactory};

/// Hard timeout on the authenticate delegate.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard timeout on transport open.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Reserved heartbeat pong deadline.
const PONG_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for the graceful driver shutdown in [`ConnectionManager::destroy`].
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── States & events ─────────────────────────────────────────────────

/// The nine connection states, grouped by name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Not connected, nothing pending.
    IdleInitial,
    /// Terminal failure; requires an explicit reconnect to escape.
    IdleFailed,
    /// Heartbeat gave the connection up while the tab was hidden.
    IdleZombie,
    /// The authenticate delegate is running.
    AuthBusy,
    /// Waiting out a backoff delay before re-authenticating.
    AuthBackoff,
    /// A transport is being opened.
    ConnectingBusy,
    /// Waiting out a backoff delay before reopening a transport.
    ConnectingBackoff,
    /// Live connection.
    OkConnected,
    /// Live connection, heartbeat awaiting its pong (reserved).
    OkAwaitingPong,
}

const GROUP_IDLE: &str = "@idle";
const GROUP_OK: &str = "@ok";

impl State for ManagerState {
    fn name(&self) -> &'static str {
        match self {
            ManagerState::IdleInitial => "@idle.initial",
            ManagerState::IdleFailed => "@idle.failed",
            ManagerState::IdleZombie => "@idle.zombie",
            ManagerState::AuthBusy => "@auth.busy",
            ManagerState::AuthBackoff => "@auth.backoff",
            ManagerState::ConnectingBusy => "@connecting.busy",
            ManagerState::ConnectingBackoff => "@connecting.backoff",
            ManagerState::OkConnected => "@ok.connected",
            ManagerState::OkAwaitingPong => "@ok.awaiting-pong",
        }
    }
}

/// Events the machine reacts to.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Begin connecting from an idle state.
    Connect,
    /// Drop everything and return to idle.
    Disconnect,
    /// Force a fresh connection attempt from any state.
    Reconnect,
    /// Purge the credential, then reconnect.
    Logout,
    /// The host regained network connectivity.
    NavigatorOnline,
    /// The host lost network connectivity.
    NavigatorOffline,
    /// The window/tab became visible again.
    WindowGotFocus,
    /// The live transport dispatched an error event.
    SocketError(String),
    /// The live transport dispatched a close event.
    SocketClose(CloseEvent),
}

impl Event for ManagerEvent {
    fn kind(&self) -> &'static str {
        match self {
            ManagerEvent::Connect => "CONNECT",
            ManagerEvent::Disconnect => "DISCONNECT",
            ManagerEvent::Reconnect => "RECONNECT",
            ManagerEvent::Logout => "LOGOUT",
            ManagerEvent::NavigatorOnline => "NAVIGATOR_ONLINE",
            ManagerEvent::NavigatorOffline => "NAVIGATOR_OFFLINE",
            ManagerEvent::WindowGotFocus => "WINDOW_GOT_FOCUS",
            ManagerEvent::SocketError(_) => "EXPLICIT_SOCKET_ERROR",
            ManagerEvent::SocketClose(_) => "EXPLICIT_SOCKET_CLOSE",
        }
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// Machine-owned connection context, mutated only through patches.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Times the machine entered the OK group since it was last idle.
    /// Distinguishes a first-time connect from a reconnect.
    pub success_count: u32,
    /// Last credential obtained; `None` forces re-authentication.
    pub auth_value: Option<String>,
    /// The live transport; non-`None` exactly while in an OK state.
    pub transport: Option<Arc<dyn Transport>>,
    /// Current retry delay, advanced monotonically within a tier ladder.
    pub backoff_delay: Duration,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("success_count", &self.success_count)
            .field("has_auth", &self.auth_value.is_some())
            .field("has_transport", &self.transport.is_some())
            .field("backoff_delay", &self.backoff_delay)
            .finish()
    }
}

fn advance_backoff(ctx: &mut ConnectionContext) {
    ctx.backoff_delay = backoff::advance(&backoff::NORMAL_TIERS, ctx.backoff_delay);
}

/// Result of the machine's async entry work.
enum AsyncOutcome {
    Authed(String),
    Opened(Arc<dyn Transport>),
}

// ── Delegates, signals, observables ─────────────────────────────────

/// Async delegate producing a credential string.
pub type AuthenticateFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync>;

/// Predicate consulted by the background keep-alive path.
pub type AllowIdlePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// The narrow contracts the manager consumes.
#[derive(Clone)]
pub struct ManagerDelegates {
    /// Obtains a credential; may reject with
    /// [`PresenceError::StopRetrying`] to abort the retry loop.
    pub authenticate: AuthenticateFn,
    /// Constructs a transport per connection attempt.
    pub make_transport: TransportFactory,
    /// Whether the connection may stay up while the tab is hidden.
    pub allow_idle_while_hidden: AllowIdlePredicate,
}

impl fmt::Debug for ManagerDelegates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerDelegates").finish()
    }
}

/// Host-visible signals the manager listens to while alive.
///
/// Embedders notify these sources from whatever the host exposes (browser
/// online/offline/visibility events, OS hooks). Injection stops when the
/// manager is destroyed.
#[derive(Debug, Clone, Default)]
pub struct HostSignals {
    /// Network connectivity regained.
    pub online: EventSource<()>,
    /// Network connectivity lost.
    pub offline: EventSource<()>,
    /// Window or tab became visible.
    pub visible: EventSource<()>,
}

impl HostSignals {
    /// Fresh signal sources with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Application-visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Never connected, not trying.
    Initial,
    /// First connection attempt in progress.
    Connecting,
    /// Live connection.
    Connected,
    /// Connection lost, retrying.
    Reconnecting,
    /// Terminal failure; waiting for an explicit reconnect.
    Failed,
}

/// Application-visible protocol error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Server-provided reason, or the delegate's message.
    pub message: String,
    /// Server close code, or [`CLIENT_ERROR_CODE`] for client-side stops.
    pub code: i32,
}

struct Shared {
    status: EventSource<Status>,
    incoming: EventSource<Bytes>,
    protocol_errors: EventSource<ProtocolError>,
    current_status: StdMutex<Status>,
    state_name: StdMutex<&'static str>,
    transport: StdMutex<Option<Arc<dyn Transport>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: EventSource::new(),
            // Paused until the machine reaches a connected state.
            incoming: EventSource::paused(),
            protocol_errors: EventSource::new(),
            current_status: StdMutex::new(Status::Initial),
            state_name: StdMutex::new(ManagerState::IdleInitial.name()),
            transport: StdMutex::new(None),
        }
    }
}

// ── Machine construction ────────────────────────────────────────────

type Machine = StateMachine<ConnectionContext, ManagerEvent, ManagerState, AsyncOutcome>;

fn build_machine(delegates: &ManagerDelegates, shared: &Arc<Shared>) -> Machine {
    use ManagerState::*;

    let context = ConnectionContext {
        success_count: 0,
        auth_value: None,
        transport: None,
        backoff_delay: backoff::reset(&backoff::NORMAL_TIERS),
    };
    let mut machine = Machine::new(IdleInitial, context);
    let handle = machine.handle();

    // ── Wildcards ───────────────────────────────────────────────────
    machine.add_transitions(
        Selector::Any,
        vec![
            (
                "RECONNECT",
                Transition::to_with(AuthBackoff, |patch, _| {
                    patch.patch(|ctx| {
                        advance_backoff(ctx);
                        ctx.success_count = 0;
                    });
                }),
            ),
            ("DISCONNECT", Transition::to(IdleInitial)),
            (
                "LOGOUT",
                Transition::to_with(AuthBackoff, |patch, _| {
                    patch.patch(|ctx: &mut ConnectionContext| {
                        ctx.auth_value = None;
                        advance_backoff(ctx);
                        ctx.success_count = 0;
                    });
                }),
            ),
        ],
    );

    // ── Idle group ──────────────────────────────────────────────────
    machine.on_enter(Selector::Group(GROUP_IDLE), |patch| {
        patch.patch(|ctx| ctx.success_count = 0);
        None
    });

    let connect = || {
        Transition::choose(|_, ctx: &ConnectionContext| {
            Some(if ctx.auth_value.is_some() {
                ConnectingBusy
            } else {
                AuthBusy
            })
        })
    };
    machine.add_transitions(Selector::State(IdleInitial), vec![("CONNECT", connect())]);
    machine.add_transitions(
        Selector::State(IdleZombie),
        vec![
            ("CONNECT", connect()),
            ("WINDOW_GOT_FOCUS", Transition::to(ConnectingBackoff)),
        ],
    );

    // ── Auth group ──────────────────────────────────────────────────
    machine.add_timed_transition(
        Selector::State(AuthBackoff),
        |ctx: &ConnectionContext| ctx.backoff_delay,
        AuthBusy,
    );
    machine.add_transitions(
        Selector::State(AuthBackoff),
        vec![(
            "NAVIGATOR_ONLINE",
            Transition::to_with(AuthBusy, |patch, _| {
                patch.patch(|ctx: &mut ConnectionContext| ctx.backoff_delay = backoff::reset(&backoff::NORMAL_TIERS));
            }),
        )],
    );

    let authenticate = Arc::clone(&delegates.authenticate);
    let shared_auth = Arc::clone(shared);
    machine.on_enter_async(
        Selector::State(AuthBusy),
        move |_ctx, cancel| {
            let authenticate = Arc::clone(&authenticate);
            Box::pin(async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(PresenceError::Cancelled),
                    outcome = tokio::time::timeout(AUTH_TIMEOUT, (authenticate)()) => {
                        match outcome {
                            Ok(result) => result.map(AsyncOutcome::Authed),
                            Err(_) => Err(PresenceError::Timeout),
                        }
                    }
                }
            })
        },
        |patch, outcome| {
            let AsyncOutcome::Authed(value) = outcome else {
                warn!("unexpected async outcome in auth state");
                return None;
            };
            patch.patch(|ctx| ctx.auth_value = Some(value));
            Some(ConnectingBusy)
        },
        move |patch, err| match err {
            PresenceError::StopRetrying(message) => {
                shared_auth.protocol_errors.notify(ProtocolError {
                    message,
                    code: CLIENT_ERROR_CODE,
                });
                Some(IdleFailed)
            }
            PresenceError::Cancelled => None,
            other => {
                warn!(error = %other, "authentication failed; backing off");
                patch.patch(advance_backoff);
                Some(AuthBackoff)
            }
        },
    );

    // ── Connecting group ────────────────────────────────────────────
    machine.add_timed_transition(
        Selector::State(ConnectingBackoff),
        |ctx: &ConnectionContext| ctx.backoff_delay,
        ConnectingBusy,
    );
    machine.add_transitions(
        Selector::State(ConnectingBackoff),
        vec![(
            "NAVIGATOR_ONLINE",
            Transition::to_with(ConnectingBusy, |patch, _| {
                patch.patch(|ctx: &mut ConnectionContext| ctx.backoff_delay = backoff::reset(&backoff::NORMAL_TIERS));
            }),
        )],
    );

    let make_transport = Arc::clone(&delegates.make_transport);
    let shared_open = Arc::clone(shared);
    machine.on_enter_async(
        Selector::State(ConnectingBusy),
        move |ctx: ConnectionContext, cancel| {
            let make_transport = Arc::clone(&make_transport);
            Box::pin(async move {
                let transport = make_transport(ctx.auth_value.as_deref());
                match await_open(transport.as_ref(), cancel).await {
                    Ok(()) => Ok(AsyncOutcome::Opened(transport)),
                    Err(err) => {
                        // A half-opened transport must never outlive its
                        // attempt, whatever the failure was.
                        transport.close();
                        Err(err)
                    }
                }
            })
        },
        |patch, outcome| {
            let AsyncOutcome::Opened(transport) = outcome else {
                warn!("unexpected async outcome in connecting state");
                return None;
            };
            patch.patch(move |ctx| {
                ctx.transport = Some(transport);
                ctx.backoff_delay = backoff::reset(&backoff::NORMAL_TIERS);
            });
            Some(OkConnected)
        },
        move |patch, err| match err {
            PresenceError::StopRetrying(message) => {
                shared_open.protocol_errors.notify(ProtocolError {
                    message,
                    code: CLIENT_ERROR_CODE,
                });
                Some(IdleFailed)
            }
            PresenceError::ServerRefusal { code, reason } => {
                shared_open.protocol_errors.notify(ProtocolError {
                    message: reason,
                    code,
                });
                Some(IdleFailed)
            }
            PresenceError::Cancelled => None,
            other => {
                // The credential may be stale; re-enter through auth.
                warn!(error = %other, "transport open failed; backing off");
                patch.patch(advance_backoff);
                Some(AuthBackoff)
            }
        },
    );

    // ── OK group ────────────────────────────────────────────────────
    let shared_ok = Arc::clone(shared);
    let handle_ok = handle.clone();
    machine.on_enter(Selector::Group(GROUP_OK), move |patch| {
        let Some(transport) = patch.get().transport.clone() else {
            warn!("entered connected state without a transport");
            return None;
        };
        patch.patch(|ctx| ctx.success_count += 1);
        *shared_ok
            .transport
            .lock()
            .expect("manager state poisoned") = Some(transport.clone());

        let incoming = shared_ok.incoming.clone();
        let message_sub = transport
            .events()
            .message
            .subscribe(move |frame: &Bytes| incoming.notify(frame.clone()));
        let h = handle_ok.clone();
        let close_sub = transport
            .events()
            .close
            .subscribe(move |event: &CloseEvent| h.send(ManagerEvent::SocketClose(event.clone())));
        let h = handle_ok.clone();
        let error_sub = transport
            .events()
            .error
            .subscribe(move |message: &String| h.send(ManagerEvent::SocketError(message.clone())));

        // Frames queued during the open-resolution window are delivered one
        // scheduler turn later, after observers saw the connected status.
        let incoming = shared_ok.incoming.clone();
        let unpause = tokio::spawn(async move {
            tokio::task::yield_now().await;
            incoming.unpause();
        });

        let shared_exit = Arc::clone(&shared_ok);
        Some(Box::new(move |patch: &mut Patch<'_, ConnectionContext>| {
            // Close and null the transport before any other transition
            // effect can observe the context.
            if let Some(transport) = patch.get().transport.clone() {
                transport.close();
            }
            patch.patch(|ctx| ctx.transport = None);
            *shared_exit
                .transport
                .lock()
                .expect("manager state poisoned") = None;
            unpause.abort();
            shared_exit.incoming.pause();
            drop(message_sub);
            drop(close_sub);
            drop(error_sub);
        }) as Cleanup<ConnectionContext>)
    });

    machine.add_transitions(
        Selector::Group(GROUP_OK),
        vec![
            (
                "EXPLICIT_SOCKET_ERROR",
                Transition::choose_with(
                    |_, ctx: &ConnectionContext| match &ctx.transport {
                        // The carrier survived; keep using it.
                        Some(t) if t.ready_state() == ReadyState::Open => None,
                        _ => Some(ConnectingBackoff),
                    },
                    |patch, _| patch.patch(advance_backoff),
                ),
            ),
            (
                "EXPLICIT_SOCKET_CLOSE",
                Transition::to_with(ConnectingBackoff, |patch, event| {
                    if let ManagerEvent::SocketClose(close) = event {
                        warn!(code = close.code, reason = %close.reason, "connection closed; scheduling reconnect");
                    }
                    patch.patch(advance_backoff);
                }),
            ),
        ],
    );

    // Reserved heartbeat path: a missed pong abandons the connection. No
    // entry effect sends pings yet, so awaiting-pong is never entered.
    machine.add_timed_transition(
        Selector::State(OkAwaitingPong),
        |_: &ConnectionContext| PONG_TIMEOUT,
        IdleZombie,
    );

    machine
}

// ── Open race ───────────────────────────────────────────────────────

struct OpenWait {
    opened: AtomicBool,
    premature: StdMutex<Option<PresenceError>>,
    notify: Notify,
}

/// Wait for `open`, honoring the premature close/error race.
///
/// Temporary subscribers record the first close or error seen while the
/// open is pending. The recorded event wins even when `open` has also
/// fired: a close that slipped in between open resolution and this
/// continuation must still fail the attempt.
async fn await_open(transport: &dyn Transport, cancel: CancellationToken) -> Result<()> {
    let wait = Arc::new(OpenWait {
        opened: AtomicBool::new(false),
        premature: StdMutex::new(None),
        notify: Notify::new(),
    });

    let w = Arc::clone(&wait);
    let _open_sub = transport.events().open.subscribe(move |_| {
        w.opened.store(true, Ordering::SeqCst);
        w.notify.notify_one();
    });
    let w = Arc::clone(&wait);
    let _close_sub = transport.events().close.subscribe(move |event: &CloseEvent| {
        let mut slot = w.premature.lock().expect("open wait poisoned");
        if slot.is_none() {
            *slot = Some(PresenceError::ServerRefusal {
                code: event.code,
                reason: event.reason.clone(),
            });
        }
        w.notify.notify_one();
    });
    let w = Arc::clone(&wait);
    let _error_sub = transport.events().error.subscribe(move |message: &String| {
        let mut slot = w.premature.lock().expect("open wait poisoned");
        if slot.is_none() {
            *slot = Some(PresenceError::Transport(message.clone()));
        }
        w.notify.notify_one();
    });

    // The transport may have resolved before we subscribed.
    match transport.ready_state() {
        ReadyState::Open => wait.opened.store(true, Ordering::SeqCst),
        ReadyState::Closed => {
            let mut slot = wait.premature.lock().expect("open wait poisoned");
            if slot.is_none() {
                *slot = Some(PresenceError::Transport(
                    "transport closed before open".into(),
                ));
            }
        }
        _ => {}
    }

    let deadline = tokio::time::Instant::now() + OPEN_TIMEOUT;
    loop {
        // Captured premature events beat a successful open.
        if let Some(err) = wait
            .premature
            .lock()
            .expect("open wait poisoned")
            .take()
        {
            return Err(err);
        }
        if wait.opened.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(PresenceError::Cancelled),
            awoken = tokio::time::timeout_at(deadline, wait.notify.notified()) => {
                if awoken.is_err() {
                    return Err(PresenceError::Timeout);
                }
            }
        }
    }
}

// ── Status derivation & driver ──────────────────────────────────────

fn derive_status(state: ManagerState, ctx: &ConnectionContext) -> Status {
    use ManagerState::*;
    match state {
        IdleInitial => Status::Initial,
        IdleFailed => Status::Failed,
        IdleZombie => Status::Reconnecting,
        AuthBusy | AuthBackoff | ConnectingBusy | ConnectingBackoff => {
            if ctx.success_count > 0 {
                Status::Reconnecting
            } else {
                Status::Connecting
            }
        }
        OkConnected | OkAwaitingPong => Status::Connected,
    }
}

fn publish(machine: &Machine, shared: &Shared, last: &mut Status) {
    *shared.state_name.lock().expect("manager state poisoned") = machine.current_state().name();
    let status = derive_status(machine.current_state(), machine.context());
    *shared
        .current_status
        .lock()
        .expect("manager state poisoned") = status;
    if status != *last {
        debug!(?status, state = machine.current_state().name(), "status changed");
        *last = status;
        shared.status.notify(status);
    }
}

async fn drive(mut machine: Machine, shared: Arc<Shared>, mut shutdown_rx: oneshot::Receiver<()>) {
    machine.start();
    let mut last = derive_status(machine.current_state(), machine.context());
    *shared
        .current_status
        .lock()
        .expect("manager state poisoned") = last;

    loop {
        tokio::select! {
            // Drain queued machine work before honoring a shutdown, so a
            // final DISCONNECT still tears the transport down.
            biased;
            alive = machine.step() => {
                if !alive {
                    break;
                }
                publish(&machine, &shared, &mut last);
            }
            _ = &mut shutdown_rx => break,
        }
    }
    machine.stop();
    debug!("connection manager driver exited");
}

// ── Manager handle ──────────────────────────────────────────────────

/// Handle to the connection machine running on its driver task.
pub struct ConnectionManager {
    handle: MachineHandle<ManagerEvent, AsyncOutcome>,
    shared: Arc<Shared>,
    task: StdMutex<Option<JoinHandle<()>>>,
    shutdown_tx: StdMutex<Option<oneshot::Sender<()>>>,
    signal_subs: StdMutex<Vec<Subscription<()>>>,
}

impl ConnectionManager {
    /// Spawn the driver task and start listening to host signals.
    pub fn new(delegates: ManagerDelegates, signals: &HostSignals) -> Self {
        let shared = Arc::new(Shared::new());
        let machine = build_machine(&delegates, &shared);
        let handle = machine.handle();

        let h = handle.clone();
        let online_sub = signals
            .online
            .subscribe(move |_| h.send(ManagerEvent::NavigatorOnline));
        let h = handle.clone();
        let offline_sub = signals
            .offline
            .subscribe(move |_| h.send(ManagerEvent::NavigatorOffline));
        let h = handle.clone();
        let visible_sub = signals
            .visible
            .subscribe(move |_| h.send(ManagerEvent::WindowGotFocus));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(drive(machine, Arc::clone(&shared), shutdown_rx));

        Self {
            handle,
            shared,
            task: StdMutex::new(Some(task)),
            shutdown_tx: StdMutex::new(Some(shutdown_tx)),
            signal_subs: StdMutex::new(vec![online_sub, offline_sub, visible_sub]),
        }
    }

    /// Begin connecting. From the failed state this escalates to a
    /// reconnect, which is the only way out of it.
    pub fn connect(&self) {
        if self.status() == Status::Failed {
            self.handle.send(ManagerEvent::Reconnect);
        } else {
            self.handle.send(ManagerEvent::Connect);
        }
    }

    /// Drop the connection and return to idle.
    pub fn disconnect(&self) {
        self.handle.send(ManagerEvent::Disconnect);
    }

    /// Force a fresh connection attempt from any state.
    pub fn reconnect(&self) {
        self.handle.send(ManagerEvent::Reconnect);
    }

    /// Purge the credential and reconnect; the authenticate delegate runs
    /// again before the next attempt.
    pub fn logout(&self) {
        self.handle.send(ManagerEvent::Logout);
    }

    /// Current application-visible status.
    pub fn status(&self) -> Status {
        *self
            .shared
            .current_status
            .lock()
            .expect("manager state poisoned")
    }

    /// Name of the machine state, for diagnostics.
    pub fn state_name(&self) -> &'static str {
        *self.shared.state_name.lock().expect("manager state poisoned")
    }

    /// Notified on every status change.
    pub fn status_changes(&self) -> EventSource<Status> {
        self.shared.status.clone()
    }

    /// Raw frames from the live transport. Paused while disconnected.
    pub fn incoming(&self) -> EventSource<Bytes> {
        self.shared.incoming.clone()
    }

    /// Application-visible terminal errors.
    pub fn protocol_errors(&self) -> EventSource<ProtocolError> {
        self.shared.protocol_errors.clone()
    }

    /// Send one frame over the live transport.
    ///
    /// # Errors
    ///
    /// [`PresenceError::NotConnected`] outside the connected states.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        let transport = self
            .shared
            .transport
            .lock()
            .expect("manager state poisoned")
            .clone();
        match transport {
            Some(transport) => transport.send(frame),
            None => Err(PresenceError::NotConnected),
        }
    }

    /// Tear the manager down: disconnect, stop the driver, remove host
    /// signal listeners. The driver gets [`SHUTDOWN_TIMEOUT`] to wind down
    /// before it is aborted.
    pub async fn destroy(&self) {
        debug!("connection manager destroy requested");
        self.handle.send(ManagerEvent::Disconnect);
        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .expect("manager state poisoned")
            .take()
        {
            let _ = tx.send(());
        }
        let task = self.task.lock().expect("manager state poisoned").take();
        if let Some(mut task) = task {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("manager driver terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("manager driver did not exit within timeout; aborting task");
                    task.abort();
                }
            }
        }
        self.signal_subs
            .lock()
            .expect("manager state poisoned")
            .clear();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .field("state", &self.state_name())
            .finish()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // `Drop` is synchronous, so the graceful path is unavailable; abort
        // the driver task outright.
        if let Some(task) = self.task.lock().expect("manager state poisoned").take() {
            task.abort();
        }
    }
}
