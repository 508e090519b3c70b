//! Reactive Context
//!
//! The reactive context records which computation is currently running so
//! that signal reads can register themselves as dependencies.
//!
//! # Implementation
//!
//! A thread-local stack holds one frame per running computation. Entering a
//! memo or effect pushes a frame; the returned guard pops it on drop, so the
//! stack stays balanced even if the computation panics.
//!
//! [`ReactiveContext::untracked`] pushes a frame with no subscriber. Reads
//! performed under it are invisible to the enclosing computation, which is
//! how tree internals peek at state without creating edges.

use std::cell::RefCell;

use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextFrame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone)]
struct ContextFrame {
    /// `None` for an untracked frame.
    subscriber_id: Option<SubscriberId>,
    /// Source IDs read during this frame, deduplicated, in first-read order.
    dependencies: Vec<u64>,
}

/// Guard for an active tracking frame. Pops the frame when dropped.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a tracking frame for the given subscriber.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextFrame {
                subscriber_id,
                dependencies: Vec::new(),
            });
        });
        Self { subscriber_id }
    }

    /// Run `f` with dependency tracking suspended.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _frame = Self::push(None);
        f()
    }

    /// Whether reads right now would be recorded as dependencies.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// The subscriber owning the innermost frame, if that frame is tracked.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.subscriber_id))
    }

    /// Record a read of the given source in the innermost tracked frame.
    pub fn track_dependency(source_id: u64) {
        CONTEXT_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                if frame.subscriber_id.is_some() && !frame.dependencies.contains(&source_id) {
                    frame.dependencies.push(source_id);
                }
            }
        });
    }

    /// Sources recorded so far in the innermost frame.
    pub fn get_dependencies() -> Vec<u64> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|frame| frame.dependencies.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.subscriber_id, self.subscriber_id,
                    "ReactiveContext frames popped out of order"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_subscriber() {
        let id = SubscriberId::new();
        assert!(!ReactiveContext::is_active());

        {
            let _ctx = ReactiveContext::enter(id);
            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn repeated_reads_are_recorded_once() {
        let _ctx = ReactiveContext::enter(SubscriberId::new());

        ReactiveContext::track_dependency(1);
        ReactiveContext::track_dependency(2);
        ReactiveContext::track_dependency(1);

        assert_eq!(ReactiveContext::get_dependencies(), vec![1, 2]);
    }

    #[test]
    fn untracked_hides_reads_from_enclosing_frame() {
        let id = SubscriberId::new();
        let _ctx = ReactiveContext::enter(id);

        ReactiveContext::untracked(|| {
            assert!(!ReactiveContext::is_active());
            ReactiveContext::track_dependency(7);
        });

        assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        assert!(ReactiveContext::get_dependencies().is_empty());
    }

    #[test]
    fn nested_contexts_restore_outer() {
        let outer = SubscriberId::new();
        let inner = SubscriberId::new();

        let _outer_ctx = ReactiveContext::enter(outer);
        {
            let _inner_ctx = ReactiveContext::enter(inner);
            assert_eq!(ReactiveContext::current_subscriber(), Some(inner));
        }
        assert_eq!(ReactiveContext::current_subscriber(), Some(outer));
    }
}
