//! In-process one-to-many observable with pause buffering.
//!
//! [`EventSource`] is the pub/sub primitive every other component leans on:
//! transport events, connection status, channel events and the paused
//! incoming-message stream are all `EventSource`s. Delivery is synchronous
//! and in subscription order. While paused, notifications queue and drain in
//! arrival order on unpause.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

type Callback<T> = Box<dyn FnMut(&T) + Send>;

struct Slot<T> {
    id: u64,
    // Taken out while the callback runs so subscribers may re-enter the
    // source (subscribe, unsubscribe, notify) without deadlocking.
    callback: Option<Callback<T>>,
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    next_id: u64,
    paused: bool,
    pending: VecDeque<T>,
}

/// A list of callbacks with stable iteration order and a pause buffer.
///
/// Cloning an `EventSource` clones the handle, not the subscriber list.
pub struct EventSource<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for EventSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Default for EventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("event source poisoned");
        f.debug_struct("EventSource")
            .field("subscribers", &inner.slots.len())
            .field("paused", &inner.paused)
            .field("pending", &inner.pending.len())
            .finish()
    }
}

impl<T: Send + 'static> EventSource<T> {
    /// Create an empty, unpaused source.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: Vec::new(),
                next_id: 0,
                paused: false,
                pending: VecDeque::new(),
            })),
        }
    }

    /// Create a source that starts paused.
    pub fn paused() -> Self {
        let source = Self::new();
        source.pause();
        source
    }

    /// Register a callback. The returned [`Subscription`] removes it when
    /// dropped or explicitly unsubscribed.
    #[must_use = "dropping the subscription immediately removes the callback"]
    pub fn subscribe(&self, callback: impl FnMut(&T) + Send + 'static) -> Subscription<T> {
        let mut inner = self.inner.lock().expect("event source poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.push(Slot {
            id,
            callback: Some(Box::new(callback)),
        });
        Subscription {
            source: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver `value` to every subscriber, or queue it while paused.
    pub fn notify(&self, value: T) {
        {
            let mut inner = self.inner.lock().expect("event source poisoned");
            if inner.paused {
                inner.pending.push_back(value);
                return;
            }
        }
        self.deliver(&value);
    }

    /// Stop delivering; subsequent notifications queue up.
    pub fn pause(&self) {
        self.inner.lock().expect("event source poisoned").paused = true;
    }

    /// Resume delivery, draining queued notifications in arrival order.
    pub fn unpause(&self) {
        loop {
            let value = {
                let mut inner = self.inner.lock().expect("event source poisoned");
                inner.paused = false;
                match inner.pending.pop_front() {
                    Some(value) => value,
                    None => return,
                }
            };
            self.deliver(&value);
            // A subscriber may have re-paused mid-drain; leave the rest queued.
            if self.inner.lock().expect("event source poisoned").paused {
                return;
            }
        }
    }

    /// Drop every subscriber. Queued notifications are kept.
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("event source poisoned")
            .slots
            .clear();
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("event source poisoned").slots.len()
    }

    fn deliver(&self, value: &T) {
        let ids: Vec<u64> = {
            let inner = self.inner.lock().expect("event source poisoned");
            inner.slots.iter().map(|slot| slot.id).collect()
        };
        for id in ids {
            let callback = {
                let mut inner = self.inner.lock().expect("event source poisoned");
                match inner.slots.iter_mut().find(|slot| slot.id == id) {
                    Some(slot) => slot.callback.take(),
                    // Unsubscribed by an earlier callback this round.
                    None => None,
                }
            };
            let Some(mut callback) = callback else {
                continue;
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(value)));
            if outcome.is_err() {
                error!("event subscriber panicked; continuing with remaining subscribers");
            }
            let mut inner = self.inner.lock().expect("event source poisoned");
            if let Some(slot) = inner.slots.iter_mut().find(|slot| slot.id == id) {
                slot.callback = Some(callback);
            }
        }
    }
}

/// Handle to a registered callback; removing it detaches the callback.
pub struct Subscription<T> {
    source: Weak<Mutex<Inner<T>>>,
    id: u64,
}

impl<T> Subscription<T> {
    /// Remove the callback now instead of at drop time.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn detach(&self) {
        if let Some(inner) = self.source.upgrade() {
            let mut inner = inner.lock().expect("event source poisoned");
            inner.slots.retain(|slot| slot.id != self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
