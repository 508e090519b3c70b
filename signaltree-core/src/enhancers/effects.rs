//! Effects enhancer.
//!
//! Side effects over the whole state, disposed when the tree is destroyed.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::reactive::Effect;
use crate::tree::{SignalTree, Subscription, TreePhase};
use crate::value::Value;

use super::{enhancer, Enhancer, EnhancerMetadata, CORE_CAPABILITY};

pub const CAPABILITY: &str = "effects";

#[derive(Default)]
pub struct EffectRegistry {
    effects: Mutex<Vec<Effect>>,
}

impl EffectRegistry {
    fn dispose_all(&self) {
        for effect in self.effects.lock().drain(..) {
            effect.dispose();
        }
    }
}

/// The effects enhancer. Applying it again is a no-op.
pub fn effects() -> Box<dyn Enhancer> {
    enhancer(
        EnhancerMetadata::new(CAPABILITY).depends_on([CORE_CAPABILITY]),
        |tree| {
            if tree.has_capability(CAPABILITY) {
                return Ok(tree);
            }
            let registry = Arc::new(EffectRegistry::default());
            let on_destroy = Arc::clone(&registry);
            tree.on_destroy(move || on_destroy.dispose_all());
            Ok(tree.with_extension(registry))
        },
    )
}

pub trait EffectsExt {
    /// Run `f` with the state now and again after every change cycle.
    fn effect<F>(&self, f: F) -> Result<Effect>
    where
        F: Fn(&Value) + Send + Sync + 'static;

    /// Like [`SignalTree::subscribe`], but the listener is kept until the
    /// tree is destroyed.
    fn on_change<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static;

    /// Number of live effects created through this enhancer.
    fn effect_count(&self) -> Result<usize>;
}

impl EffectsExt for SignalTree {
    fn effect<F>(&self, f: F) -> Result<Effect>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let registry = self.require_extension::<EffectRegistry>(CAPABILITY, "effect")?;
        let core = self.downgrade();
        let effect = Effect::new(move || {
            let Some(core) = core.upgrade() else { return };
            if core.phase() == TreePhase::Destroyed {
                return;
            }
            let state = core.root_signal().get();
            f(&state);
        });
        registry.effects.lock().push(effect.clone());
        Ok(effect)
    }

    fn on_change<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.require_extension::<EffectRegistry>(CAPABILITY, "on_change")?;
        let subscription: Subscription = self.subscribe(f)?;
        subscription.detach();
        Ok(())
    }

    fn effect_count(&self) -> Result<usize> {
        let registry = self.require_extension::<EffectRegistry>(CAPABILITY, "effect_count")?;
        let mut effects = registry.effects.lock();
        effects.retain(|effect| !effect.is_disposed());
        Ok(effects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tree() -> SignalTree {
        SignalTree::new(json!({"count": 0}))
            .unwrap()
            .with([effects()])
            .unwrap()
    }

    #[test]
    fn effect_runs_now_and_after_changes() {
        let tree = tree();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tree.effect(move |state| sink.lock().push(state["count"].as_i64().unwrap_or(-1)))
            .unwrap();

        tree.leaf("count").unwrap().set(1).unwrap();
        tree.batch(|| {
            tree.leaf("count").unwrap().set(2).unwrap();
            tree.leaf("count").unwrap().set(3).unwrap();
        })
        .unwrap();

        assert_eq!(*seen.lock(), vec![0, 1, 3]);
    }

    #[test]
    fn destroy_disposes_effects() {
        let tree = tree();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let effect = tree
            .effect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(tree.effect_count().unwrap(), 1);

        tree.destroy();
        assert!(effect.is_disposed());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_change_listener_survives_handle_scope() {
        let tree = tree();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        tree.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tree.leaf("count").unwrap().set(5).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
