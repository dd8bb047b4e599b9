//! Generic typed state machine with timed and asynchronous transitions.
//!
//! States are named `@group.leaf`; selectors address one state, a whole
//! group, or every state, so transition tables and entry effects can be
//! registered at any granularity (leaf-specific registrations win over group
//! registrations, which win over wildcards).
//!
//! The machine is driven from a single task: [`StateMachine::send`] is
//! synchronous at the machine boundary, while timers and async entry work
//! run on spawned tasks and report back through the machine's internal
//! channel, to be applied by [`StateMachine::step`]. Results arriving after
//! the arming state was exited are discarded.
//!
//! For one `send`, the observable order is: event receipt, target
//! computation, exit cleanups of the states being left (deepest first), the
//! transition's own effect, entry hooks of the states being entered
//! (outermost first), arming of timed/async entry work, and finally
//! `did_enter_state`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::PresenceError;
use crate::event_source::EventSource;

/// A state identifier with a `@group.leaf` name.
pub trait State: Copy + Eq + fmt::Debug + Send + 'static {
    /// Fully qualified name, e.g. `"@ok.connected"`.
    fn name(&self) -> &'static str;
}

/// An event with a stable kind tag used to key the transition table.
pub trait Event: Clone + fmt::Debug + Send + 'static {
    /// Table key, e.g. `"CONNECT"`.
    fn kind(&self) -> &'static str;
}

/// Selects one state, every state in a group, or every state.
#[derive(Debug, Clone, Copy)]
pub enum Selector<S> {
    /// Exactly one state.
    State(S),
    /// Every state whose name starts with `"@group."` for the given
    /// `"@group"` prefix.
    Group(&'static str),
    /// Every state.
    Any,
}

impl<S: State> Selector<S> {
    fn matches(&self, state: S) -> bool {
        match self {
            Selector::State(s) => *s == state,
            Selector::Group(prefix) => {
                let name = state.name();
                name.starts_with(prefix) && name.as_bytes().get(prefix.len()) == Some(&b'.')
            }
            Selector::Any => true,
        }
    }

    /// Narrower selectors rank higher; used for lookup precedence and for
    /// ordering entry hooks outermost-first.
    fn rank(&self) -> u8 {
        match self {
            Selector::Any => 0,
            Selector::Group(_) => 1,
            Selector::State(_) => 2,
        }
    }
}

/// The single legal mutation gate for machine context.
///
/// Effects and entry hooks receive a `Patch`; read-only observers receive
/// `&C`. Everything the machine owns flows through [`Patch::patch`].
pub struct Patch<'a, C> {
    ctx: &'a mut C,
}

impl<'a, C> Patch<'a, C> {
    /// Read the current context.
    pub fn get(&self) -> &C {
        self.ctx
    }

    /// Apply a mutation to the context.
    pub fn patch(&mut self, apply: impl FnOnce(&mut C)) {
        apply(self.ctx);
    }
}

/// Cleanup thunk returned by an entry hook, run when the state is exited.
pub type Cleanup<C> = Box<dyn FnOnce(&mut Patch<'_, C>) + Send>;

/// Future returned by async entry work.
pub type AsyncWork<R> = Pin<Box<dyn Future<Output = Result<R, PresenceError>> + Send>>;

/// One row of the transition table: computes an optional target state and
/// optionally mutates context while transitioning.
pub struct Transition<C, E, S> {
    target: Box<dyn Fn(&E, &C) -> Option<S> + Send>,
    effect: Option<Box<dyn Fn(&mut Patch<'_, C>, &E) + Send>>,
}

impl<C, E, S: State> Transition<C, E, S> {
    /// Unconditionally transition to `state`.
    pub fn to(state: S) -> Self {
        Self {
            target: Box::new(move |_, _| Some(state)),
            effect: None,
        }
    }

    /// Transition to `state`, running `effect` between exit and entry.
    pub fn to_with(state: S, effect: impl Fn(&mut Patch<'_, C>, &E) + Send + 'static) -> Self {
        Self {
            target: Box::new(move |_, _| Some(state)),
            effect: Some(Box::new(effect)),
        }
    }

    /// Compute the target from the event and context; `None` ignores the
    /// event without transitioning.
    pub fn choose(f: impl Fn(&E, &C) -> Option<S> + Send + 'static) -> Self {
        Self {
            target: Box::new(f),
            effect: None,
        }
    }

    /// [`choose`](Transition::choose) plus an effect, run only when a target
    /// was produced.
    pub fn choose_with(
        f: impl Fn(&E, &C) -> Option<S> + Send + 'static,
        effect: impl Fn(&mut Patch<'_, C>, &E) + Send + 'static,
    ) -> Self {
        Self {
            target: Box::new(f),
            effect: Some(Box::new(effect)),
        }
    }
}

struct TransitionEntry<C, E, S> {
    selector: Selector<S>,
    kind: &'static str,
    transition: Transition<C, E, S>,
}

type EnterFn<C> = Box<dyn FnMut(&mut Patch<'_, C>) -> Option<Cleanup<C>> + Send>;

struct EnterHook<C, S> {
    selector: Selector<S>,
    hook: EnterFn<C>,
}

struct TimedEntry<C, S> {
    selector: Selector<S>,
    delay: Box<dyn Fn(&C) -> Duration + Send>,
    target: S,
}

type WorkFn<C, R> = Box<dyn Fn(C, CancellationToken) -> AsyncWork<R> + Send>;
type ResolveFn<C, S, R> = Box<dyn Fn(&mut Patch<'_, C>, R) -> Option<S> + Send>;
type RejectFn<C, S> = Box<dyn Fn(&mut Patch<'_, C>, PresenceError) -> Option<S> + Send>;

struct AsyncEntry<C, S, R> {
    selector: Selector<S>,
    work: WorkFn<C, R>,
    on_ok: ResolveFn<C, S, R>,
    on_fail: RejectFn<C, S>,
}

enum Envelope<E, R> {
    Event(E),
    TimerFired { id: u64 },
    AsyncDone { id: u64, outcome: Result<R, PresenceError> },
}

struct ArmedTimer<S> {
    id: u64,
    selector: Selector<S>,
    target: S,
    handle: JoinHandle<()>,
}

struct ArmedAsync<S> {
    id: u64,
    selector: Selector<S>,
    entry_index: usize,
    token: CancellationToken,
}

/// Cloneable handle for injecting events into a running machine.
pub struct MachineHandle<E, R> {
    tx: mpsc::UnboundedSender<Envelope<E, R>>,
}

impl<E, R> Clone for MachineHandle<E, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E, R> MachineHandle<E, R> {
    /// Queue an event; it is processed by the next [`StateMachine::step`].
    /// Events queued by synchronous code are processed in call order.
    pub fn send(&self, event: E) {
        let _ = self.tx.send(Envelope::Event(event));
    }
}

impl<E, R> fmt::Debug for MachineHandle<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineHandle").finish()
    }
}

/// A generic state machine over `(Context, Event, State)` with async entry
/// work resolving to `R`.
pub struct StateMachine<C, E, S, R = ()> {
    current: S,
    context: C,
    started: bool,
    next_arm_id: u64,
    transitions: Vec<TransitionEntry<C, E, S>>,
    enter_hooks: Vec<EnterHook<C, S>>,
    timed: Vec<TimedEntry<C, S>>,
    async_entries: Vec<AsyncEntry<C, S, R>>,
    active_cleanups: Vec<(Selector<S>, Cleanup<C>)>,
    active_timers: Vec<ArmedTimer<S>>,
    active_async: Vec<ArmedAsync<S>>,
    tx: mpsc::UnboundedSender<Envelope<E, R>>,
    rx: mpsc::UnboundedReceiver<Envelope<E, R>>,
    did_receive_event: EventSource<E>,
    will_transition: EventSource<(S, S)>,
    did_enter_state: EventSource<S>,
    did_ignore_event: EventSource<E>,
}

impl<C, E, S, R> StateMachine<C, E, S, R>
where
    C: Clone + Send + 'static,
    E: Event,
    S: State,
    R: Send + 'static,
{
    /// Create a machine in `initial` with the given context. No entry hooks
    /// run until [`start`](StateMachine::start).
    pub fn new(initial: S, context: C) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            current: initial,
            context,
            started: false,
            next_arm_id: 0,
            transitions: Vec::new(),
            enter_hooks: Vec::new(),
            timed: Vec::new(),
            async_entries: Vec::new(),
            active_cleanups: Vec::new(),
            active_timers: Vec::new(),
            active_async: Vec::new(),
            tx,
            rx,
            did_receive_event: EventSource::new(),
            will_transition: EventSource::new(),
            did_enter_state: EventSource::new(),
            did_ignore_event: EventSource::new(),
        }
    }

    // ── Registration ────────────────────────────────────────────────

    /// Register transitions for every state matched by `selector`.
    /// Registrations on a narrower selector take precedence.
    pub fn add_transitions(
        &mut self,
        selector: Selector<S>,
        rows: Vec<(&'static str, Transition<C, E, S>)>,
    ) {
        for (kind, transition) in rows {
            self.transitions.push(TransitionEntry {
                selector,
                kind,
                transition,
            });
        }
    }

    /// Register an entry hook. The hook may return a cleanup that runs when
    /// the matched scope is exited; cleanups run deepest-first.
    ///
    /// Group and wildcard hooks fire on boundary crossings only: a
    /// transition between two states of the same group re-runs leaf hooks
    /// but not the group's.
    pub fn on_enter(
        &mut self,
        selector: Selector<S>,
        hook: impl FnMut(&mut Patch<'_, C>) -> Option<Cleanup<C>> + Send + 'static,
    ) {
        self.enter_hooks.push(EnterHook {
            selector,
            hook: Box::new(hook),
        });
    }

    /// Schedule a transition to `target` to fire once per entry to the
    /// matched scope, after `delay(ctx)` elapses, unless the scope is exited
    /// first (exit cancels the timer).
    pub fn add_timed_transition(
        &mut self,
        selector: Selector<S>,
        delay: impl Fn(&C) -> Duration + Send + 'static,
        target: S,
    ) {
        self.timed.push(TimedEntry {
            selector,
            delay: Box::new(delay),
            target,
        });
    }

    /// Run `work(ctx, cancel)` on entry to the matched scope. On `Ok` the
    /// machine applies `on_ok` (which may patch context) and transitions to
    /// the state it returns; on `Err`, `on_fail` likewise. Exiting the scope
    /// cancels the token; results of a cancelled entry are discarded.
    pub fn on_enter_async(
        &mut self,
        selector: Selector<S>,
        work: impl Fn(C, CancellationToken) -> AsyncWork<R> + Send + 'static,
        on_ok: impl Fn(&mut Patch<'_, C>, R) -> Option<S> + Send + 'static,
        on_fail: impl Fn(&mut Patch<'_, C>, PresenceError) -> Option<S> + Send + 'static,
    ) {
        self.async_entries.push(AsyncEntry {
            selector,
            work: Box::new(work),
            on_ok: Box::new(on_ok),
            on_fail: Box::new(on_fail),
        });
    }

    // ── Introspection ───────────────────────────────────────────────

    /// The state the machine is currently in.
    pub fn current_state(&self) -> S {
        self.current
    }

    /// Read-only view of the context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Notified with every event handed to [`send`](StateMachine::send).
    pub fn did_receive_event(&self) -> EventSource<E> {
        self.did_receive_event.clone()
    }

    /// Notified with `(from, to)` before exit cleanups run.
    pub fn will_transition(&self) -> EventSource<(S, S)> {
        self.will_transition.clone()
    }

    /// Notified after the full entry chain of a transition completes.
    pub fn did_enter_state(&self) -> EventSource<S> {
        self.did_enter_state.clone()
    }

    /// Notified with events that matched no transition (or whose handler
    /// returned no target).
    pub fn did_ignore_event(&self) -> EventSource<E> {
        self.did_ignore_event.clone()
    }

    /// Handle for queueing events from other tasks or from effects.
    pub fn handle(&self) -> MachineHandle<E, R> {
        MachineHandle {
            tx: self.tx.clone(),
        }
    }

    // ── Driving ─────────────────────────────────────────────────────

    /// Enter the initial state: run matching entry hooks, arm timed and
    /// async entries, notify `did_enter_state`.
    pub fn start(&mut self) {
        debug_assert!(!self.started, "machine started twice");
        self.started = true;
        debug!(state = self.current.name(), "fsm start");
        let to = self.current;
        self.run_entry_hooks(None, to);
        self.arm_entry_work(None, to);
        self.did_enter_state.notify(to);
    }

    /// Process one queued envelope. Returns `false` when every handle has
    /// been dropped and the queue is drained.
    pub async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(envelope) => {
                self.process(envelope);
                true
            }
            None => false,
        }
    }

    /// Process one queued envelope if any is ready, without waiting.
    /// Returns `false` when the queue was empty.
    pub fn try_step(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(envelope) => {
                self.process(envelope);
                true
            }
            Err(_) => false,
        }
    }

    /// Deliver an event synchronously. The entire effect chain (exit
    /// cleanups, transition effect, entry hooks, arming) completes before
    /// this returns; follow-up events queued by effects are processed by
    /// subsequent [`step`](StateMachine::step) calls.
    pub fn send(&mut self, event: E) {
        trace!(
            kind = event.kind(),
            state = self.current.name(),
            "fsm event"
        );
        self.did_receive_event.notify(event.clone());

        let Some(index) = self.find_transition(&event) else {
            debug!(
                kind = event.kind(),
                state = self.current.name(),
                "event ignored: no transition"
            );
            self.did_ignore_event.notify(event);
            return;
        };
        let target = (self.transitions[index].transition.target)(&event, &self.context);
        let Some(target) = target else {
            debug!(
                kind = event.kind(),
                state = self.current.name(),
                "event ignored: handler declined"
            );
            self.did_ignore_event.notify(event);
            return;
        };

        let from = self.current;
        debug!(
            kind = event.kind(),
            from = from.name(),
            to = target.name(),
            "fsm transition"
        );
        self.will_transition.notify((from, target));
        self.run_exit_phase(from, target);
        {
            let Self {
                transitions,
                context,
                ..
            } = self;
            if let Some(effect) = &transitions[index].transition.effect {
                let mut patch = Patch { ctx: context };
                effect(&mut patch, &event);
            }
        }
        self.current = target;
        self.run_entry_hooks(Some(from), target);
        self.arm_entry_work(Some(from), target);
        self.did_enter_state.notify(target);
    }

    /// Cancel all armed timers and async work. Used when the machine's
    /// driver shuts down.
    pub fn stop(&mut self) {
        for timer in self.active_timers.drain(..) {
            timer.handle.abort();
        }
        for armed in self.active_async.drain(..) {
            armed.token.cancel();
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn process(&mut self, envelope: Envelope<E, R>) {
        match envelope {
            Envelope::Event(event) => self.send(event),
            Envelope::TimerFired { id } => {
                let Some(pos) = self.active_timers.iter().position(|t| t.id == id) else {
                    // The arming state was exited; the timer is stale.
                    return;
                };
                let timer = self.active_timers.remove(pos);
                debug!(
                    from = self.current.name(),
                    to = timer.target.name(),
                    "timed transition fired"
                );
                self.transition_internal(timer.target, |_| {});
            }
            Envelope::AsyncDone { id, outcome } => {
                let Some(pos) = self.active_async.iter().position(|a| a.id == id) else {
                    debug!("discarding stale async completion");
                    return;
                };
                let armed = self.active_async.remove(pos);
                let entry_index = armed.entry_index;
                let target = {
                    let Self {
                        async_entries,
                        context,
                        ..
                    } = self;
                    let entry = &async_entries[entry_index];
                    let mut patch = Patch { ctx: context };
                    match outcome {
                        Ok(value) => (entry.on_ok)(&mut patch, value),
                        Err(err) => (entry.on_fail)(&mut patch, err),
                    }
                };
                if let Some(target) = target {
                    debug!(
                        from = self.current.name(),
                        to = target.name(),
                        "async entry resolved"
                    );
                    self.transition_internal(target, |_| {});
                }
            }
        }
    }

    /// Transition without an originating event (timed or async completion).
    fn transition_internal(&mut self, target: S, effect: impl FnOnce(&mut Patch<'_, C>)) {
        let from = self.current;
        self.will_transition.notify((from, target));
        self.run_exit_phase(from, target);
        {
            let mut patch = Patch {
                ctx: &mut self.context,
            };
            effect(&mut patch);
        }
        self.current = target;
        self.run_entry_hooks(Some(from), target);
        self.arm_entry_work(Some(from), target);
        self.did_enter_state.notify(target);
    }

    fn find_transition(&self, event: &E) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, entry) in self.transitions.iter().enumerate() {
            if entry.kind != event.kind() || !entry.selector.matches(self.current) {
                continue;
            }
            match best {
                Some(current_best)
                    if self.transitions[current_best].selector.rank()
                        >= entry.selector.rank() => {}
                _ => best = Some(index),
            }
        }
        best
    }

    /// True when a scope matched by `selector` is being left in a
    /// transition `from → to`. Self-transitions exit (and re-enter)
    /// everything they match.
    fn leaves(selector: &Selector<S>, from: S, to: S) -> bool {
        selector.matches(from) && (from == to || !selector.matches(to))
    }

    /// Mirror of [`leaves`](Self::leaves) for the entry side.
    fn enters(selector: &Selector<S>, from: Option<S>, to: S) -> bool {
        selector.matches(to)
            && match from {
                Some(from) => from == to || !selector.matches(from),
                None => true,
            }
    }

    fn run_exit_phase(&mut self, from: S, to: S) {
        // Cancel timers and async work scoped to states being left, before
        // cleanups run, so no completion can interleave with teardown.
        self.active_timers.retain(|timer| {
            if Self::leaves(&timer.selector, from, to) {
                timer.handle.abort();
                false
            } else {
                true
            }
        });
        self.active_async.retain(|armed| {
            if Self::leaves(&armed.selector, from, to) {
                armed.token.cancel();
                false
            } else {
                true
            }
        });

        let mut leaving: Vec<Cleanup<C>> = Vec::new();
        let mut kept = Vec::new();
        for (selector, cleanup) in self.active_cleanups.drain(..) {
            if Self::leaves(&selector, from, to) {
                leaving.push(cleanup);
            } else {
                kept.push((selector, cleanup));
            }
        }
        self.active_cleanups = kept;
        // Cleanups were pushed outermost-first on entry; exit runs deepest
        // first.
        for cleanup in leaving.into_iter().rev() {
            let mut patch = Patch {
                ctx: &mut self.context,
            };
            cleanup(&mut patch);
        }
    }

    fn run_entry_hooks(&mut self, from: Option<S>, to: S) {
        // Outermost scopes enter first: wildcard, then group, then leaf.
        let mut indices: Vec<usize> = (0..self.enter_hooks.len())
            .filter(|&i| Self::enters(&self.enter_hooks[i].selector, from, to))
            .collect();
        indices.sort_by_key(|&i| self.enter_hooks[i].selector.rank());
        for i in indices {
            let selector = self.enter_hooks[i].selector;
            let cleanup = {
                let Self {
                    enter_hooks,
                    context,
                    ..
                } = self;
                let mut patch = Patch { ctx: context };
                (enter_hooks[i].hook)(&mut patch)
            };
            if let Some(cleanup) = cleanup {
                self.active_cleanups.push((selector, cleanup));
            }
        }
    }

    fn arm_entry_work(&mut self, from: Option<S>, to: S) {
        for i in 0..self.timed.len() {
            if !Self::enters(&self.timed[i].selector, from, to) {
                continue;
            }
            let delay = (self.timed[i].delay)(&self.context);
            let id = self.next_arm_id;
            self.next_arm_id += 1;
            let tx = self.tx.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Envelope::TimerFired { id });
            });
            self.active_timers.push(ArmedTimer {
                id,
                selector: self.timed[i].selector,
                target: self.timed[i].target,
                handle,
            });
        }

        for (entry_index, entry) in self.async_entries.iter().enumerate() {
            if !Self::enters(&entry.selector, from, to) {
                continue;
            }
            let id = self.next_arm_id;
            self.next_arm_id += 1;
            let token = CancellationToken::new();
            let work = (entry.work)(self.context.clone(), token.clone());
            let tx = self.tx.clone();
            // The work observes its token and returns promptly on cancel;
            // stale completions are dropped by the id check either way.
            tokio::spawn(async move {
                let outcome = work.await;
                let _ = tx.send(Envelope::AsyncDone { id, outcome });
            });
            self.active_async.push(ArmedAsync {
                id,
                selector: entry.selector,
                entry_index,
                token,
            });
        }
    }
}

impl<C, E, S: State, R> fmt::Debug for StateMachine<C, E, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.current.name())
            .field("timers", &self.active_timers.len())
            .field("pending_async", &self.active_async.len())
            .finish()
    }
}

impl<C, E, S, R> Drop for StateMachine<C, E, S, R> {
    fn drop(&mut self) {
        for timer in self.active_timers.drain(..) {
            timer.handle.abort();
        }
        for armed in self.active_async.drain(..) {
            armed.token.cancel();
        }
    }
}
