//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation inside a tracking
//!    context and caches the result.
//!
//! 2. Every source read during the computation becomes a runtime edge into
//!    the memo's subscriber ID.
//!
//! 3. When one of those sources changes, the runtime marks the memo
//!    "maybe dirty". Nothing is recomputed yet.
//!
//! 4. On next access the memo recomputes. If the new value equals the cached
//!    one, the cache and version are kept.
//!
//! Memos are sources themselves: a memo read inside another computation adds
//! an edge from the memo's source ID, and the memo forwards its own
//! invalidation to those readers.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::{Reactive, ReactiveHandle, Runtime};
use super::signal::next_source_id;
use super::subscriber::SubscriberId;

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

struct MemoInner<T> {
    source_id: u64,
    subscriber_id: SubscriberId,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    state: RwLock<MemoState>,
    /// Source IDs read during the last computation.
    dependencies: RwLock<HashSet<u64>>,
    /// Number of computations whose result differed from the cache.
    version: RwLock<u64>,
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {
        let was_clean = {
            let mut state = self.state.write();
            let was_clean = *state == MemoState::Clean;
            if was_clean {
                *state = MemoState::MaybeDirty;
            }
            was_clean
        };
        if was_clean {
            Runtime::notify_signal_change(self.source_id);
        }
    }

    fn schedule(&self) {}

    fn is_eager(&self) -> bool {
        false
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The PartialEq bound lets a recomputation that yields the same value keep
/// the cached version.
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<MemoInner<T>>,
    _handle: Arc<ReactiveHandle>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            source_id: next_source_id(),
            subscriber_id: SubscriberId::new(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(MemoState::Dirty),
            dependencies: RwLock::new(HashSet::new()),
            version: RwLock::new(0),
        });
        let handle = Runtime::register(inner.clone());
        Self {
            inner,
            _handle: Arc::new(handle),
        }
    }

    /// Source ID other computations record when they read this memo.
    pub fn id(&self) -> u64 {
        self.inner.source_id
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        if let Some(reader) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(self.inner.source_id);
            Runtime::add_dependency(self.inner.source_id, reader);
        }

        if self.state() == MemoState::Clean {
            if let Some(value) = self.inner.value.read().clone() {
                return value;
            }
        }
        self.recompute()
    }

    /// Mark the memo as potentially needing recomputation.
    pub fn mark_maybe_dirty(&self) {
        self.inner.mark_maybe_dirty();
    }

    /// Mark the memo as definitely needing recomputation.
    pub fn mark_dirty(&self) {
        *self.inner.state.write() = MemoState::Dirty;
    }

    fn recompute(&self) -> T {
        let inner = &self.inner;
        Runtime::clear_dependencies(inner.subscriber_id);

        let (new_value, new_deps) = {
            let _ctx = ReactiveContext::enter(inner.subscriber_id);
            let value = (inner.compute)();
            let deps: HashSet<u64> = ReactiveContext::get_dependencies().into_iter().collect();
            (value, deps)
        };
        *inner.dependencies.write() = new_deps;

        {
            let mut cached = inner.value.write();
            if cached.as_ref() != Some(&new_value) {
                *cached = Some(new_value.clone());
                *inner.version.write() += 1;
            }
        }
        *inner.state.write() = MemoState::Clean;

        new_value
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.read()
    }

    /// How many times the cached value actually changed.
    pub fn version(&self) -> u64 {
        *self.inner.version.read()
    }

    /// Number of sources read during the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.read().len()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _handle: Arc::clone(&self._handle),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("version", &self.version())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn memo_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert!(!memo.has_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(memo.has_value());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_invalidated_by_signal_write() {
        let signal = Signal::new(3);
        let reader = signal.clone();
        let memo = Memo::new(move || reader.get() * 2);

        assert_eq!(memo.get(), 6);
        assert_eq!(memo.dependency_count(), 1);

        signal.set(5);
        assert_eq!(memo.state(), MemoState::MaybeDirty);
        assert_eq!(memo.get(), 10);
        assert_eq!(memo.state(), MemoState::Clean);
    }

    #[test]
    fn unchanged_result_keeps_version() {
        let signal = Signal::new(4);
        let reader = signal.clone();
        let parity = Memo::new(move || reader.get() % 2);

        assert_eq!(parity.get(), 0);
        let version = parity.version();

        signal.set(6);
        assert_eq!(parity.get(), 0);
        assert_eq!(parity.version(), version);
    }

    #[test]
    fn memo_chain_propagates_invalidation() {
        let base = Signal::new(5);
        let reader = base.clone();
        let doubled = Memo::new(move || reader.get() * 2);
        let doubled_reader = doubled.clone();
        let plus_ten = Memo::new(move || doubled_reader.get() + 10);

        assert_eq!(plus_ten.get(), 20);

        base.set(10);
        assert_eq!(plus_ten.state(), MemoState::MaybeDirty);
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn memo_clone_shares_state() {
        let memo1 = Memo::new(|| 42);
        assert_eq!(memo1.get(), 42);

        let memo2 = memo1.clone();
        assert_eq!(memo1.id(), memo2.id());
        assert!(memo2.has_value());

        memo1.mark_dirty();
        assert_eq!(memo2.state(), MemoState::Dirty);
    }
}
