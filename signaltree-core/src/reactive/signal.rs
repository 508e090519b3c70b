//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal registers that context as a subscriber.
//!
//! 2. When a signal's value changes, the signal hands a notification job to
//!    the runtime. Outside a batch the job runs at once; inside a batch it is
//!    queued and runs once when the batch closes.
//!
//! 3. The job calls the signal's local listeners, then lets the runtime
//!    mark and re-run dependent computations.
//!
//! # Thread Safety
//!
//! The value lives behind a `parking_lot::RwLock`. Listener callbacks are
//! cloned out of their lock before being invoked, so a listener may
//! subscribe or unsubscribe without deadlocking.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::SubscriberId;

/// Counter shared by every reactive source (signals and memos), so source
/// IDs never collide in the runtime's edge table.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_source_id() -> u64 {
    SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Listener = Arc<dyn Fn() + Send + Sync>;
type ListenerList = Arc<RwLock<Vec<(SubscriberId, Listener)>>>;

/// A reactive signal holding a value of type T.
///
/// Clones share the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let value = count.get();
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: u64,
    value: Arc<RwLock<T>>,
    /// Subscribers that have read this signal inside a tracking context.
    subscribers: Arc<RwLock<HashSet<SubscriberId>>>,
    /// Listeners attached through [`Signal::subscribe`].
    listeners: ListenerList,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: next_source_id(),
            value: Arc::new(RwLock::new(value)),
            subscribers: Arc::new(RwLock::new(HashSet::new())),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        self.track();
        self.value.read().clone()
    }

    /// Read the value by reference, with tracking.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&*self.value.read())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Read the value by reference without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read())
    }

    fn track(&self) {
        if let Some(subscriber_id) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(self.id);
            self.subscribers.write().insert(subscriber_id);
            Runtime::add_dependency(self.id, subscriber_id);
        }
    }

    /// Set a new value and notify subscribers.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        self.notify();
    }

    /// Replace the value without notifying anyone.
    pub fn set_silent(&self, value: T) {
        *self.value.write() = value;
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&*guard)
        };
        self.set(new_value);
    }

    /// Announce a change to listeners and dependents.
    pub fn notify(&self) {
        let id = self.id;
        let listeners = Arc::clone(&self.listeners);
        Runtime::dispatch(
            id,
            Arc::new(move || {
                let snapshot: Vec<Listener> =
                    listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
                for listener in snapshot {
                    listener();
                }
                Runtime::notify_signal_change(id);
            }),
        );
    }

    /// Register a listener called after every change notification.
    pub fn subscribe<F>(&self, subscriber_id: SubscriberId, notify: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribers.write().insert(subscriber_id);
        self.listeners.write().push((subscriber_id, Arc::new(notify)));
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.subscribers.write().remove(&subscriber_id);
        self.listeners.write().retain(|(id, _)| *id != subscriber_id);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Drop every listener and tracked subscriber.
    pub fn clear_subscribers(&self) {
        self.subscribers.write().clear();
        self.listeners.write().clear();
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
