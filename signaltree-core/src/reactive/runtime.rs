//! Reactive Runtime
//!
//! The runtime connects sources (signals, memos) to the computations that
//! read them (memos, effects) and decides when those computations run.
//!
//! # How It Works
//!
//! 1. Memos and effects register themselves and get a [`ReactiveHandle`].
//!
//! 2. When a tracked read happens, the runtime records an edge from the
//!    source ID to the current subscriber.
//!
//! 3. When a source changes, the runtime:
//!    a. Looks up every subscriber with an edge from that source
//!    b. Marks each one "maybe dirty"
//!    c. Re-runs the eager ones (effects) immediately
//!    d. Leaves the lazy ones (memos) to recompute on next access
//!
//! # Batching
//!
//! [`Runtime::batch`] opens a thread-local batch scope. Change notifications
//! raised inside the scope are queued (one per source, in first-write order)
//! and delivered once the outermost scope closes. Writes themselves are never
//! deferred: reads inside a batch see every value written so far.
//!
//! # Thread Safety
//!
//! The registry and the edge table are process-wide behind `parking_lot`
//! locks, so signals can be shared across threads. Batch scopes are
//! per-thread, matching the synchronous update model.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::subscriber::SubscriberId;

/// A computation the runtime can notify.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this reactive value as potentially needing update.
    fn mark_maybe_dirty(&self);

    /// Run this reactive value now (effects only).
    fn schedule(&self);

    /// Effects are eager, memos are lazy.
    fn is_eager(&self) -> bool;
}

/// Handle to a registered reactive value.
///
/// Dropping this handle unregisters the reactive value from the runtime.
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
}

impl ReactiveHandle {
    /// The subscriber this handle keeps registered.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id);
    }
}

/// A queued change notification.
pub type NotifyJob = Arc<dyn Fn() + Send + Sync>;

/// The global reactive runtime.
pub struct Runtime;

type Registry = RwLock<HashMap<SubscriberId, Weak<dyn Reactive>>>;
type EdgeTable = RwLock<HashMap<u64, IndexSet<SubscriberId>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static SOURCE_SUBSCRIBERS: OnceLock<EdgeTable> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn source_subscribers() -> &'static EdgeTable {
    SOURCE_SUBSCRIBERS.get_or_init(|| RwLock::new(HashMap::new()))
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: IndexMap<u64, NotifyJob>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Closes a batch scope on drop and flushes queued notifications when the
/// outermost scope ends.
struct BatchScope;

impl BatchScope {
    fn open() -> Self {
        BATCH.with(|batch| batch.borrow_mut().depth += 1);
        Self
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let flushed = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.depth -= 1;
            if batch.depth == 0 {
                Some(std::mem::take(&mut batch.pending))
            } else {
                None
            }
        });

        let Some(jobs) = flushed else {
            return;
        };
        if std::thread::panicking() {
            tracing::debug!(dropped = jobs.len(), "batch unwound, discarding notifications");
            return;
        }
        if !jobs.is_empty() {
            tracing::trace!(sources = jobs.len(), "flushing batched notifications");
        }
        for (_, job) in jobs {
            job();
        }
    }
}

impl Runtime {
    /// Register a reactive value with the runtime.
    ///
    /// Returns a handle that unregisters the value when dropped.
    pub fn register(reactive: Arc<dyn Reactive>) -> ReactiveHandle {
        let id = reactive.subscriber_id();
        registry().write().insert(id, Arc::downgrade(&reactive));
        ReactiveHandle { subscriber_id: id }
    }

    fn unregister(id: SubscriberId) {
        registry().write().remove(&id);
        Self::clear_dependencies(id);
    }

    /// Whether a subscriber is currently registered.
    pub fn is_registered(id: SubscriberId) -> bool {
        registry().read().contains_key(&id)
    }

    /// Record that a subscriber depends on a source.
    pub fn add_dependency(source_id: u64, subscriber_id: SubscriberId) {
        source_subscribers()
            .write()
            .entry(source_id)
            .or_default()
            .insert(subscriber_id);
    }

    /// Remove every edge into a subscriber.
    ///
    /// Called before re-running a computation so stale edges do not linger.
    pub fn clear_dependencies(subscriber_id: SubscriberId) {
        let mut table = source_subscribers().write();
        table.retain(|_, subs| {
            subs.shift_remove(&subscriber_id);
            !subs.is_empty()
        });
    }

    /// Subscribers currently depending on a source, in registration order.
    pub fn dependents_of(source_id: u64) -> Vec<SubscriberId> {
        source_subscribers()
            .read()
            .get(&source_id)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tell every dependent of `source_id` that it changed.
    pub fn notify_signal_change(source_id: u64) {
        let subscriber_ids = Self::dependents_of(source_id);
        if subscriber_ids.is_empty() {
            return;
        }

        // Upgrade under the lock, act on them after it is released: marking a
        // memo dirty can re-enter the runtime.
        let live: Vec<Arc<dyn Reactive>> = {
            let registry = registry().read();
            subscriber_ids
                .iter()
                .filter_map(|id| registry.get(id).and_then(Weak::upgrade))
                .collect()
        };

        let mut effects_to_run = Vec::new();
        for reactive in live {
            reactive.mark_maybe_dirty();
            if reactive.is_eager() {
                effects_to_run.push(reactive);
            }
        }

        for effect in effects_to_run {
            effect.schedule();
        }
    }

    /// Deliver a change notification, or queue it if a batch is open.
    ///
    /// Queued jobs are keyed by source, so a source written many times in
    /// one batch notifies once.
    pub fn dispatch(source_id: u64, job: NotifyJob) {
        let deferred = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            if batch.depth > 0 {
                batch.pending.entry(source_id).or_insert_with(|| job.clone());
                true
            } else {
                false
            }
        });

        if !deferred {
            job();
        }
    }

    /// Run `f` inside a batch scope. Scopes nest; notifications flush when the
    /// outermost one returns.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        let _scope = BatchScope::open();
        f()
    }

    /// Whether a batch scope is open on this thread.
    pub fn is_batching() -> bool {
        Self::batch_depth() > 0
    }

    /// Nesting depth of batch scopes on this thread.
    pub fn batch_depth() -> usize {
        BATCH.with(|batch| batch.borrow().depth)
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    struct MockReactive {
        id: SubscriberId,
        dirty: AtomicBool,
        scheduled: AtomicI32,
        eager: bool,
    }

    impl MockReactive {
        fn new(eager: bool) -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                dirty: AtomicBool::new(false),
                scheduled: AtomicI32::new(0),
                eager,
            })
        }
    }

    impl Reactive for MockReactive {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn mark_maybe_dirty(&self) {
            self.dirty.store(true, Ordering::SeqCst);
        }

        fn schedule(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }

        fn is_eager(&self) -> bool {
            self.eager
        }
    }

    // Source IDs in these tests sit far above anything the signal counter
    // hands out during a test run.
    const SOURCE_BASE: u64 = u64::MAX - 1_000;

    #[test]
    fn handle_drop_unregisters() {
        let reactive = MockReactive::new(false);
        let id = reactive.id;

        let handle = Runtime::register(reactive);
        assert!(Runtime::is_registered(id));

        drop(handle);
        assert!(!Runtime::is_registered(id));
    }

    #[test]
    fn notify_marks_memos_and_runs_effects() {
        let memo = MockReactive::new(false);
        let effect = MockReactive::new(true);
        let _memo_handle = Runtime::register(memo.clone());
        let _effect_handle = Runtime::register(effect.clone());

        let source = SOURCE_BASE + 1;
        Runtime::add_dependency(source, memo.id);
        Runtime::add_dependency(source, effect.id);
        Runtime::notify_signal_change(source);

        assert!(memo.dirty.load(Ordering::SeqCst));
        assert!(effect.dirty.load(Ordering::SeqCst));
        assert_eq!(memo.scheduled.load(Ordering::SeqCst), 0);
        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_edges_schedule_once() {
        let effect = MockReactive::new(true);
        let _handle = Runtime::register(effect.clone());

        let source = SOURCE_BASE + 2;
        Runtime::add_dependency(source, effect.id);
        Runtime::add_dependency(source, effect.id);
        Runtime::notify_signal_change(source);

        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_dependencies_removes_edges() {
        let reactive = MockReactive::new(false);
        let _handle = Runtime::register(reactive.clone());

        let source = SOURCE_BASE + 3;
        Runtime::add_dependency(source, reactive.id);
        assert!(Runtime::dependents_of(source).contains(&reactive.id));

        Runtime::clear_dependencies(reactive.id);
        assert!(!Runtime::dependents_of(source).contains(&reactive.id));
    }

    #[test]
    fn batch_defers_and_coalesces_jobs() {
        let runs = Arc::new(AtomicI32::new(0));
        let job: NotifyJob = {
            let runs = runs.clone();
            Arc::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        Runtime::batch(|| {
            Runtime::dispatch(SOURCE_BASE + 4, job.clone());
            Runtime::dispatch(SOURCE_BASE + 4, job.clone());
            Runtime::batch(|| Runtime::dispatch(SOURCE_BASE + 4, job.clone()));
            assert_eq!(Runtime::batch_depth(), 1);
            assert_eq!(runs.load(Ordering::SeqCst), 0);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!Runtime::is_batching());
    }

    #[test]
    fn dispatch_outside_batch_runs_immediately() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        Runtime::dispatch(
            SOURCE_BASE + 5,
            Arc::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
