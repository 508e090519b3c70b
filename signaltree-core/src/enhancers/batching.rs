//! Batching enhancer.
//!
//! Wraps the whole-tree `set` and `update` so each call commits inside a
//! batch scope, and adds [`BatchingExt::batch_update`] for grouping several
//! writes into one notification cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::reactive::Runtime;
use crate::tree::SignalTree;

use super::{enhancer, Enhancer, EnhancerMetadata, CORE_CAPABILITY};

pub const CAPABILITY: &str = "batching";

/// Counters kept by the batching enhancer.
#[derive(Debug, Default)]
pub struct BatchStats {
    cycles: AtomicU64,
}

impl BatchStats {
    fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let outermost = !Runtime::is_batching();
        let result = Runtime::batch(f);
        if outermost {
            self.cycles.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

/// The batching enhancer. Applying it again is a no-op.
pub fn batching() -> Box<dyn Enhancer> {
    enhancer(
        EnhancerMetadata::new(CAPABILITY).depends_on([CORE_CAPABILITY]),
        |tree| {
            if tree.has_capability(CAPABILITY) {
                return Ok(tree);
            }
            let stats = Arc::new(BatchStats::default());

            let set_stats = Arc::clone(&stats);
            let update_stats = Arc::clone(&stats);
            Ok(tree
                .wrap_set(move |tree, value, next| set_stats.run(|| next(tree, value)))
                .wrap_update(move |tree, updater, next| update_stats.run(|| next(tree, updater)))
                .with_extension(stats))
        },
    )
}

/// Batching operations on an enhanced tree.
pub trait BatchingExt {
    /// Run `f` with every write inside it coalesced into one notification
    /// cycle.
    fn batch_update<R>(&self, f: impl FnOnce(&SignalTree) -> R) -> Result<R>;

    /// Number of outermost batch scopes opened by this enhancer.
    fn batched_cycles(&self) -> Result<u64>;
}

impl BatchingExt for SignalTree {
    fn batch_update<R>(&self, f: impl FnOnce(&SignalTree) -> R) -> Result<R> {
        let stats = self.require_extension::<BatchStats>(CAPABILITY, "batch_update")?;
        Ok(stats.run(|| f(self)))
    }

    fn batched_cycles(&self) -> Result<u64> {
        let stats = self.require_extension::<BatchStats>(CAPABILITY, "batched_cycles")?;
        Ok(stats.cycles.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;
    use crate::value::Value;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counted(tree: &SignalTree) -> (Arc<AtomicUsize>, crate::tree::Subscription) {
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cycles);
        let sub = tree
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (cycles, sub)
    }

    #[test]
    fn batch_update_coalesces_writes() {
        let tree = SignalTree::new(json!({"a": 0, "b": 0}))
            .unwrap()
            .with([batching()])
            .unwrap();
        let (cycles, _sub) = counted(&tree);

        tree.batch_update(|tree| {
            tree.leaf("a").unwrap().set(1).unwrap();
            tree.leaf("b").unwrap().set(2).unwrap();
            tree.update(|_| Value::from(json!({"c": 3}))).unwrap();
        })
        .unwrap();

        assert_eq!(cycles.load(Ordering::SeqCst), 1);
        assert_eq!(tree.batched_cycles().unwrap(), 1);
        assert_eq!(
            tree.get().unwrap(),
            Value::from(json!({"a": 1, "b": 2, "c": 3}))
        );
    }

    #[test]
    fn wrapped_set_counts_cycles() {
        let tree = SignalTree::new(json!({"n": 0}))
            .unwrap()
            .with([batching()])
            .unwrap();
        tree.set(json!({"n": 1})).unwrap();
        tree.update(|_| Value::from(json!({"n": 2}))).unwrap();
        assert_eq!(tree.batched_cycles().unwrap(), 2);
    }

    #[test]
    fn reapplying_is_a_noop() {
        let tree = SignalTree::new(json!({"n": 0}))
            .unwrap()
            .with([batching()])
            .unwrap();
        let again = tree.with([batching()]).unwrap();

        again.set(json!({"n": 1})).unwrap();
        assert_eq!(again.batched_cycles().unwrap(), 1);
        assert_eq!(tree.batched_cycles().unwrap(), 1);
    }

    #[test]
    fn requires_the_enhancer() {
        let tree = SignalTree::new(json!({})).unwrap();
        assert!(matches!(
            tree.batched_cycles(),
            Err(TreeError::CapabilityMissing { .. })
        ));
    }
}
