//! Method layers, capabilities and subscriptions.
//!
//! Enhancers never mutate a tree in place. Wrapping `set` or `update`
//! produces a new [`MethodLayer`] whose functions hold the previous layer and
//! delegate to it, and the new layer goes into a new tree value. Trees built
//! earlier keep their own layer.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;

use crate::error::Result;
use crate::reactive::SubscriberId;
use crate::value::Value;

use super::store::TreeCore;
use super::SignalTree;

/// Boxed updater passed through `update` layers.
pub type Updater = Box<dyn FnOnce(&Value) -> Value>;

/// One layer of the whole-tree `set`.
pub type SetFn = Arc<dyn Fn(&SignalTree, Value) -> Result<()> + Send + Sync>;

/// One layer of the whole-tree `update`.
pub type UpdateFn = Arc<dyn Fn(&SignalTree, Updater) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct MethodLayer {
    pub(crate) set: SetFn,
    pub(crate) update: UpdateFn,
}

impl MethodLayer {
    /// The undecorated methods: `set` replaces the root, `update` merges the
    /// updater's result into an object root one level deep.
    pub(crate) fn base() -> Self {
        Self {
            set: Arc::new(|tree: &SignalTree, value: Value| tree.commit_root("set", |_| value)),
            update: Arc::new(|tree: &SignalTree, updater: Updater| {
                tree.commit_root("update", |current| {
                    let next = updater(current);
                    crate::value::deep::merge_shallow(current, next)
                })
            }),
        }
    }
}

/// Capability names and typed extension state attached by enhancers.
#[derive(Clone, Default)]
pub(crate) struct Capabilities {
    pub(crate) names: IndexSet<Arc<str>>,
    pub(crate) extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Capabilities {
    /// The capability set of a fresh tree.
    pub(crate) fn core() -> Self {
        let mut caps = Self::default();
        caps.names.insert(Arc::from(crate::enhancers::CORE_CAPABILITY));
        caps
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub(crate) fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let ext = self.extensions.get(&TypeId::of::<T>())?;
        Arc::clone(ext).downcast::<T>().ok()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("names", &self.names)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// A listener registered with [`SignalTree::subscribe`].
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep
/// the listener until the tree is destroyed.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    core: Weak<TreeCore>,
    id: Option<SubscriberId>,
}

impl Subscription {
    pub(crate) fn new(core: Weak<TreeCore>, id: SubscriberId) -> Self {
        Self { core, id: Some(id) }
    }

    pub fn id(&self) -> Option<SubscriberId> {
        self.id
    }

    /// Stop listening now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the listener for the lifetime of the tree.
    pub fn detach(mut self) {
        self.id.take();
    }

    fn release(&mut self) {
        if let (Some(id), Some(core)) = (self.id.take(), self.core.upgrade()) {
            core.root_signal().unsubscribe(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
