//! Shared state behind every [`super::SignalTree`] value.
//!
//! # How Commits Work
//!
//! Every write in the crate, whether from a leaf, the root, an entity
//! collection or a history restore, funnels through [`TreeCore::commit`]:
//!
//! 1. The value currently stored at the target path is handed to the
//!    caller's function, which returns the replacement.
//!
//! 2. If the replacement is the same reference as the old value, nothing
//!    happens and no one is notified.
//!
//! 3. Otherwise a new root is built with only the root-to-target spine
//!    reallocated. If the replacement changes the accessor shape at that
//!    path, the cached accessor subtree there is dropped.
//!
//! 4. The root signal is updated and notifies its dependents, or queues the
//!    notification if a batch is open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::path::{Path, PathCache};
use crate::reactive::Signal;
use crate::value::deep::{get_in, same_shape, set_in};
use crate::value::Value;

use super::accessor::{Accessor, AccessorKind};

/// Lifecycle of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreePhase {
    /// Building the initial accessor structure.
    Constructing,
    /// Accepting reads and writes.
    Active,
    /// Torn down. Terminal.
    Destroyed,
}

type Disposer = Box<dyn FnOnce() + Send>;

pub(crate) struct TreeCore {
    config: TreeConfig,
    root: Signal<Value>,
    phase: RwLock<TreePhase>,
    accessor_root: Mutex<Option<Accessor>>,
    path_cache: Mutex<PathCache>,
    /// Serializes read-compute-store; reentrant so a listener that writes
    /// during a synchronous notification does not deadlock.
    write_lock: ReentrantMutex<()>,
    version: AtomicU64,
    last_action: Mutex<Arc<str>>,
    disposers: Mutex<Vec<Disposer>>,
}

impl TreeCore {
    pub(crate) fn new(initial: Value, config: TreeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let path_cache = PathCache::new(config.path_cache_size)?;
        let core = Arc::new(Self {
            config,
            root: Signal::new(initial),
            phase: RwLock::new(TreePhase::Constructing),
            accessor_root: Mutex::new(None),
            path_cache: Mutex::new(path_cache),
            write_lock: ReentrantMutex::new(()),
            version: AtomicU64::new(0),
            last_action: Mutex::new(Arc::from("@@INIT")),
            disposers: Mutex::new(Vec::new()),
        });

        core.build_root_accessor();
        *core.phase.write() = TreePhase::Active;
        tracing::debug!(tree = %core.config.name, "tree constructed");
        Ok(core)
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub(crate) fn phase(&self) -> TreePhase {
        *self.phase.read()
    }

    pub(crate) fn root_signal(&self) -> &Signal<Value> {
        &self.root
    }

    /// Fail with [`TreeError::Destroyed`] once the tree is torn down.
    pub(crate) fn ensure_active(&self, operation: &'static str) -> Result<()> {
        if self.phase() == TreePhase::Destroyed {
            return Err(TreeError::Destroyed {
                tree: self.config.name.clone(),
                operation,
            });
        }
        Ok(())
    }

    /// Upgrade a weak core reference held by an accessor or enhancer.
    pub(crate) fn upgrade(weak: &Weak<TreeCore>, operation: &'static str) -> Result<Arc<TreeCore>> {
        let core = weak.upgrade().ok_or_else(|| TreeError::Destroyed {
            tree: "<dropped>".to_string(),
            operation,
        })?;
        core.ensure_active(operation)?;
        Ok(core)
    }

    /// Number of commits that changed the state.
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn last_action(&self) -> Arc<str> {
        self.last_action.lock().clone()
    }

    /// Read the value at `path`, tracked by any active reactive context.
    pub(crate) fn read(&self, path: &Path) -> Value {
        self.root
            .with(|root| get_in(root, path.segments()).cloned().unwrap_or_default())
    }

    pub(crate) fn read_untracked(&self, path: &Path) -> Value {
        self.root
            .with_untracked(|root| get_in(root, path.segments()).cloned().unwrap_or_default())
    }

    /// The value at `path`, or `None` when a key along it is missing.
    pub(crate) fn lookup(&self, path: &Path) -> Option<Value> {
        self.root
            .with_untracked(|root| get_in(root, path.segments()).cloned())
    }

    pub(crate) fn parse_path(&self, path: &str) -> Path {
        self.path_cache.lock().parse(path)
    }

    pub(crate) fn with_path_cache<R>(&self, f: impl FnOnce(&mut PathCache) -> R) -> R {
        f(&mut self.path_cache.lock())
    }

    /// Replace the value at `path` with `next(current)`.
    ///
    /// Returns whether anything changed.
    pub(crate) fn commit(
        &self,
        action: &str,
        path: &Path,
        next: impl FnOnce(&Value) -> Value,
    ) -> Result<bool> {
        self.ensure_active("commit")?;

        let replaced = {
            let _guard = self.write_lock.lock();
            let old_root = self.root.get_untracked();
            let old = get_in(&old_root, path.segments());
            let current = old.cloned().unwrap_or_default();
            let new = next(&current);

            if old.is_some() && new.ptr_eq(&current) {
                tracing::trace!(tree = %self.config.name, path = %path, action, "commit skipped: unchanged");
                return Ok(false);
            }

            let replaced = !same_shape(&current, &new);
            let new_root = set_in(&old_root, path.segments(), new);
            if replaced {
                self.invalidate(path);
            }
            self.version.fetch_add(1, Ordering::SeqCst);
            *self.last_action.lock() = Arc::from(action);
            self.root.set_silent(new_root);
            replaced
        };

        if self.config.debug {
            tracing::debug!(tree = %self.config.name, path = %path, action, replaced, "commit");
        } else {
            tracing::trace!(tree = %self.config.name, path = %path, action, replaced, "commit");
        }

        self.root.notify();
        Ok(true)
    }

    /// Root accessor, rebuilt if the root changed kind.
    pub(crate) fn root_accessor(self: &Arc<Self>) -> Result<Accessor> {
        self.ensure_active("state")?;
        Ok(self.build_root_accessor())
    }

    fn build_root_accessor(self: &Arc<Self>) -> Accessor {
        let kind = self
            .root
            .with_untracked(|root| AccessorKind::of(Some(root)));
        let mut slot = self.accessor_root.lock();
        if let Some(existing) = slot.as_ref() {
            if existing.kind() == kind {
                return existing.clone();
            }
        }
        let accessor = Accessor::build(Arc::downgrade(self), Path::root(), kind);
        *slot = Some(accessor.clone());
        accessor
    }

    /// Drop the cached accessor at `path` and everything below it.
    fn invalidate(&self, path: &Path) {
        tracing::trace!(tree = %self.config.name, path = %path, "invalidating accessor subtree");

        let Some((last, parents)) = path.segments().split_last() else {
            self.accessor_root.lock().take();
            return;
        };

        let Some(Accessor::Object(mut node)) = self.accessor_root.lock().clone() else {
            return;
        };
        for key in parents {
            match node.cached_child(key) {
                Some(Accessor::Object(next)) => node = next,
                _ => return,
            }
        }
        node.forget_child(last);
    }

    /// Register cleanup to run on destroy.
    pub(crate) fn on_destroy(&self, disposer: impl FnOnce() + Send + 'static) {
        self.disposers.lock().push(Box::new(disposer));
    }

    /// Tear the tree down. Idempotent.
    pub(crate) fn destroy(&self) {
        {
            let mut phase = self.phase.write();
            if *phase == TreePhase::Destroyed {
                return;
            }
            *phase = TreePhase::Destroyed;
        }

        let disposers = std::mem::take(&mut *self.disposers.lock());
        let count = disposers.len();
        for dispose in disposers {
            dispose();
        }

        self.root.clear_subscribers();
        self.accessor_root.lock().take();
        self.path_cache.lock().clear();
        tracing::debug!(tree = %self.config.name, disposers = count, "tree destroyed");
    }
}

impl Drop for TreeCore {
    fn drop(&mut self) {
        for dispose in self.disposers.get_mut().drain(..) {
            dispose();
        }
    }
}
