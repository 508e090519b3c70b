//! Memoization enhancer.
//!
//! Keeps a per-tree cache of [`Memo`]s over the state. Each memo reads the
//! root signal, so any commit marks it dirty; recomputing to an equal value
//! keeps the cached one.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::error::Result;
use crate::reactive::Memo;
use crate::tree::{SignalTree, TreeCore};
use crate::value::Value;

use super::{enhancer, Enhancer, EnhancerMetadata, CORE_CAPABILITY};

pub const CAPABILITY: &str = "memoization";

#[derive(Default)]
pub struct MemoCache {
    memos: DashMap<String, Memo<Value>>,
}

fn derive<F>(core: Weak<TreeCore>, f: F) -> Memo<Value>
where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
{
    Memo::new(move || match core.upgrade() {
        Some(core) => f(&core.root_signal().get()),
        None => Value::Undefined,
    })
}

/// The memoization enhancer. Applying it again is a no-op.
pub fn memoization() -> Box<dyn Enhancer> {
    enhancer(
        EnhancerMetadata::new(CAPABILITY).depends_on([CORE_CAPABILITY]),
        |tree| {
            if tree.has_capability(CAPABILITY) {
                return Ok(tree);
            }
            let cache = Arc::new(MemoCache::default());
            let on_destroy = Arc::clone(&cache);
            tree.on_destroy(move || on_destroy.memos.clear());
            Ok(tree.with_extension(cache))
        },
    )
}

/// Derived-value caching on an enhanced tree.
pub trait MemoizationExt {
    /// Compute `f(state)` under `key`, reusing the cached result until the
    /// state changes. The first call for a key fixes its function.
    fn memoize<F>(&self, key: &str, f: F) -> Result<Value>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static;

    /// An uncached-by-key derived value, recomputed lazily after changes.
    fn computed<F>(&self, f: F) -> Result<Memo<Value>>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static;

    fn memo_cache_len(&self) -> Result<usize>;

    fn clear_memo_cache(&self) -> Result<()>;
}

impl MemoizationExt for SignalTree {
    fn memoize<F>(&self, key: &str, f: F) -> Result<Value>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let cache = self.require_extension::<MemoCache>(CAPABILITY, "memoize")?;
        let memo = cache
            .memos
            .entry(key.to_string())
            .or_insert_with(|| derive(self.downgrade(), f))
            .clone();
        Ok(memo.get())
    }

    fn computed<F>(&self, f: F) -> Result<Memo<Value>>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.require_extension::<MemoCache>(CAPABILITY, "computed")?;
        Ok(derive(self.downgrade(), f))
    }

    fn memo_cache_len(&self) -> Result<usize> {
        Ok(self
            .require_extension::<MemoCache>(CAPABILITY, "memo_cache_len")?
            .memos
            .len())
    }

    fn clear_memo_cache(&self) -> Result<()> {
        self.require_extension::<MemoCache>(CAPABILITY, "clear_memo_cache")?
            .memos
            .clear();
        Ok(())
    }
}
