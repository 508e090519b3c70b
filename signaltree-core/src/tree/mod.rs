//! The Signal Tree
//!
//! A [`SignalTree`] owns one immutable [`Value`] held in a root signal and
//! exposes it two ways: whole-tree `get`/`set`/`update`/`batch`, and a lazily
//! built tree of [`Accessor`]s mirroring the state shape.
//!
//! # Tree Values
//!
//! A `SignalTree` is a cheap handle. Clones share the state, the accessor
//! cache and the lifecycle. Enhancers return *new* handles that still share
//! the state but carry an extended method layer and capability set, so
//! enhancing a tree never changes what an earlier handle does.
//!
//! # Destroyed Trees
//!
//! [`SignalTree::destroy`] is idempotent and terminal. Afterwards every
//! operation on the tree, its accessors and its enhancers, reads included,
//! returns [`TreeError::Destroyed`].

mod accessor;
mod store;
mod ops;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::config::TreeConfig;
use crate::enhancers::{resolve_enhancer_order, Enhancer};
use crate::error::{Result, TreeError};
use crate::path::{Path, PathCacheStats};
use crate::reactive::{ReactiveContext, Runtime, SubscriberId};
use crate::value::deep::deep_clone;
use crate::value::Value;

pub use self::accessor::{Accessor, AccessorKind, LeafNode, ObjectAccessor};
pub use self::store::TreePhase;
pub use self::ops::{SetFn, Subscription, UpdateFn, Updater};

pub(crate) use self::store::TreeCore;
use self::ops::{Capabilities, MethodLayer};

/// A reactive hierarchical state container.
///
/// # Example
///
/// ```rust,ignore
/// let tree = SignalTree::new(json!({"a": {"b": 1}, "c": [1, 2, 3]}))?;
/// tree.leaf("a.b")?.set(2)?;
/// assert_eq!(tree.get()?["a"]["b"], Value::from(2));
/// ```
#[derive(Clone)]
pub struct SignalTree {
    core: Arc<TreeCore>,
    layer: Arc<MethodLayer>,
    caps: Arc<Capabilities>,
}

impl SignalTree {
    /// Create a tree with the default configuration.
    pub fn new(initial: impl Into<Value>) -> Result<Self> {
        Self::with_config(initial, TreeConfig::default())
    }

    /// Create a tree. Fails if the configuration is invalid.
    pub fn with_config(initial: impl Into<Value>, config: TreeConfig) -> Result<Self> {
        let core = TreeCore::new(initial.into(), config)?;
        Ok(Self {
            core,
            layer: Arc::new(MethodLayer::base()),
            caps: Arc::new(Capabilities::core()),
        })
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &TreeConfig {
        self.core.config()
    }

    pub fn phase(&self) -> TreePhase {
        self.core.phase()
    }

    pub fn is_destroyed(&self) -> bool {
        self.phase() == TreePhase::Destroyed
    }

    // ---- Whole-tree surface ----

    /// The full current state, tracked by any active reactive context.
    pub fn get(&self) -> Result<Value> {
        self.core.ensure_active("get")?;
        Ok(self.core.root_signal().get())
    }

    pub fn get_untracked(&self) -> Result<Value> {
        self.core.ensure_active("get")?;
        Ok(self.core.root_signal().get_untracked())
    }

    /// Replace the whole state.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.core.ensure_active("set")?;
        (self.layer.set)(self, value.into())
    }

    /// Compute the next state from the current one.
    ///
    /// When the state and the result are both objects the result is a
    /// partial patch merged one level deep; otherwise it replaces the state.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value + 'static) -> Result<()> {
        self.core.ensure_active("update")?;
        (self.layer.update)(self, Box::new(f))
    }

    /// Run `f` with change notifications coalesced into one cycle.
    ///
    /// Reads inside `f` see every write made so far. Nested batches flush
    /// once, when the outermost returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.core.ensure_active("batch")?;
        Ok(Runtime::batch(f))
    }

    /// A deep copy of the state that shares nothing with the tree.
    pub fn snapshot(&self) -> Result<Value> {
        self.core.ensure_active("snapshot")?;
        Ok(deep_clone(&self.core.root_signal().get_untracked()))
    }

    /// Call `listener` with the new state once per notification cycle.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.core.ensure_active("subscribe")?;
        let id = SubscriberId::new();
        let weak = self.downgrade();
        self.core.root_signal().subscribe(id, move || {
            if let Some(core) = weak.upgrade() {
                let state = core.root_signal().get_untracked();
                ReactiveContext::untracked(|| listener(&state));
            }
        });
        Ok(Subscription::new(self.downgrade(), id))
    }

    /// Release cached accessors, enhancer resources and subscriptions.
    /// Calling it again does nothing.
    pub fn destroy(&self) {
        self.core.destroy();
    }

    /// Number of commits that changed the state.
    pub fn version(&self) -> u64 {
        self.core.version()
    }

    /// Label of the most recent commit, such as `"set:user.name"`.
    pub fn last_action(&self) -> Arc<str> {
        self.core.last_action()
    }

    // ---- Accessors ----

    /// The root accessor.
    pub fn state(&self) -> Result<Accessor> {
        self.core.root_accessor()
    }

    /// The root accessor, which must be an object.
    pub fn root_node(&self) -> Result<ObjectAccessor> {
        self.state()?.into_object()
    }

    /// Accessor at a dot-delimited path.
    pub fn at(&self, path: &str) -> Result<Accessor> {
        self.core.ensure_active("at")?;
        let parsed = self.core.parse_path(path);
        self.at_path(&parsed)
    }

    pub fn at_path(&self, path: &Path) -> Result<Accessor> {
        let mut accessor = self.state()?;
        for key in path.segments() {
            accessor = accessor.child(key)?;
        }
        Ok(accessor)
    }

    pub fn leaf(&self, path: &str) -> Result<LeafNode> {
        self.at(path)?.into_leaf()
    }

    pub fn node(&self, path: &str) -> Result<ObjectAccessor> {
        self.at(path)?.into_object()
    }

    pub fn path_cache_stats(&self) -> PathCacheStats {
        self.core.with_path_cache(|cache| cache.stats())
    }

    pub fn is_path_cached(&self, path: &str) -> bool {
        self.core.with_path_cache(|cache| cache.contains(path))
    }

    pub fn resize_path_cache(&self, capacity: usize) -> Result<()> {
        self.core.with_path_cache(|cache| cache.resize(capacity))
    }

    // ---- Composition ----

    /// Apply enhancers, ordered so declared dependencies come first.
    ///
    /// The whole list is resolved before any enhancer runs; an unsatisfied
    /// dependency or a cycle fails without touching the tree.
    pub fn with<I>(&self, enhancers: I) -> Result<SignalTree>
    where
        I: IntoIterator<Item = Box<dyn Enhancer>>,
    {
        self.core.ensure_active("with")?;

        let available: Vec<Arc<str>> = self.caps.names.iter().cloned().collect();
        let ordered = resolve_enhancer_order(enhancers.into_iter().collect(), &available)?;

        let mut tree = self.clone();
        for enhancer in ordered {
            let metadata = enhancer.metadata();
            tracing::debug!(tree = %self.name(), enhancer = %metadata.name, "applying enhancer");
            tree = enhancer.apply(tree)?;
            for capability in &metadata.provides {
                tree = tree.with_capability(capability.as_str());
            }
        }
        Ok(tree)
    }

    /// Apply a single enhancer.
    pub fn enhance(&self, enhancer: impl Enhancer + 'static) -> Result<SignalTree> {
        self.with([Box::new(enhancer) as Box<dyn Enhancer>])
    }

    /// Capability names, in the order they were attached.
    pub fn capabilities(&self) -> Vec<Arc<str>> {
        self.caps.names.iter().cloned().collect()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.caps.contains(name)
    }

    /// A new handle with `name` added to the capability set.
    pub fn with_capability(&self, name: &str) -> SignalTree {
        if self.has_capability(name) {
            return self.clone();
        }
        let mut caps = (*self.caps).clone();
        caps.names.insert(Arc::from(name));
        self.with_caps(caps)
    }

    /// Typed state attached by an enhancer.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.caps.extension::<T>()
    }

    /// Like [`SignalTree::extension`], failing with
    /// [`TreeError::CapabilityMissing`] when the enhancer was not applied.
    pub fn require_extension<T: Any + Send + Sync>(
        &self,
        capability: &str,
        operation: &'static str,
    ) -> Result<Arc<T>> {
        self.core.ensure_active(operation)?;
        self.extension::<T>()
            .ok_or_else(|| TreeError::CapabilityMissing {
                capability: capability.to_string(),
                operation,
            })
    }

    /// A new handle carrying `extension`, replacing one of the same type.
    pub fn with_extension<T: Any + Send + Sync>(&self, extension: Arc<T>) -> SignalTree {
        let mut caps = (*self.caps).clone();
        caps.extensions.insert(TypeId::of::<T>(), extension);
        self.with_caps(caps)
    }

    /// A new handle whose `set` runs `wrapper`, which receives the previous
    /// layer's `set` to delegate to.
    pub fn wrap_set<F>(&self, wrapper: F) -> SignalTree
    where
        F: Fn(&SignalTree, Value, &SetFn) -> Result<()> + Send + Sync + 'static,
    {
        let previous = Arc::clone(&self.layer.set);
        let set: SetFn =
            Arc::new(move |tree: &SignalTree, value: Value| wrapper(tree, value, &previous));
        self.with_layer(MethodLayer {
            set,
            update: Arc::clone(&self.layer.update),
        })
    }

    /// A new handle whose `update` runs `wrapper`, which receives the
    /// previous layer's `update` to delegate to.
    pub fn wrap_update<F>(&self, wrapper: F) -> SignalTree
    where
        F: Fn(&SignalTree, Updater, &UpdateFn) -> Result<()> + Send + Sync + 'static,
    {
        let previous = Arc::clone(&self.layer.update);
        let update: UpdateFn =
            Arc::new(move |tree: &SignalTree, updater: Updater| wrapper(tree, updater, &previous));
        self.with_layer(MethodLayer {
            set: Arc::clone(&self.layer.set),
            update,
        })
    }

    /// Run `disposer` when the tree is destroyed.
    pub fn on_destroy(&self, disposer: impl FnOnce() + Send + 'static) {
        self.core.on_destroy(disposer);
    }

    fn with_caps(&self, caps: Capabilities) -> SignalTree {
        SignalTree {
            core: Arc::clone(&self.core),
            layer: Arc::clone(&self.layer),
            caps: Arc::new(caps),
        }
    }

    fn with_layer(&self, layer: MethodLayer) -> SignalTree {
        SignalTree {
            core: Arc::clone(&self.core),
            layer: Arc::new(layer),
            caps: Arc::clone(&self.caps),
        }
    }

    // ---- Crate-internal plumbing ----

    pub(crate) fn core(&self) -> &Arc<TreeCore> {
        &self.core
    }

    pub(crate) fn downgrade(&self) -> Weak<TreeCore> {
        Arc::downgrade(&self.core)
    }

    /// Commit at the root, bypassing method layers.
    pub(crate) fn commit_root(
        &self,
        action: &str,
        next: impl FnOnce(&Value) -> Value,
    ) -> Result<()> {
        self.core.commit(action, &Path::root(), next).map(drop)
    }
}

impl fmt::Debug for SignalTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalTree")
            .field("name", &self.name())
            .field("phase", &self.phase())
            .field("version", &self.version())
            .field("capabilities", &self.caps.names)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
