//! Enhancers
//!
//! An enhancer takes a tree and returns an augmented tree: extra
//! capabilities, extension state, and wrapped `set`/`update` layers.
//! [`crate::SignalTree::with`] orders a list of enhancers by their declared
//! dependencies and applies them in turn.
//!
//! # Built-in Enhancers
//!
//! | Capability      | Constructor                      | Re-application  |
//! |-----------------|----------------------------------|-----------------|
//! | `batching`      | [`batching()`]                   | no-op           |
//! | `memoization`   | [`memoization()`]                | no-op           |
//! | `entities`      | [`entities()`]                   | no-op           |
//! | `time-travel`   | [`time_travel()`]                | `AlreadyApplied`|
//! | `serialization` | [`serialization()`]              | no-op           |
//! | `devtools`      | [`devtools()`]                   | no-op           |
//! | `effects`       | [`effects()`]                    | no-op           |
//!
//! Custom enhancers implement [`Enhancer`] or wrap a closure with
//! [`enhancer()`].

pub mod batching;
pub mod devtools;
pub mod effects;
pub mod entities;
pub mod memoization;
mod order;
pub mod serialization;
pub mod time_travel;

use std::fmt;

use crate::error::Result;
use crate::tree::SignalTree;

pub use self::batching::{batching, BatchingExt};
pub use self::devtools::{devtools, devtools_with, ActionRecord, DevtoolsConfig, DevtoolsExt};
pub use self::effects::{effects, EffectsExt};
pub use self::entities::{
    entities, entity_map, entity_map_with, EntitiesExt, EntityCollection, EntityConfig, EntityRef,
};
pub use self::memoization::{memoization, MemoizationExt};
pub use self::order::{resolve_enhancer_order, resolve_order};
pub use self::serialization::{
    serialization, serialization_with, MemoryStorage, SerializationConfig, SerializationExt,
    StorageAdapter,
};
pub use self::time_travel::{
    time_travel, time_travel_with, History, HistoryEntry, TimeTravelConfig, TimeTravelExt,
};

/// Capability every tree has before any enhancer runs.
pub const CORE_CAPABILITY: &str = "core";

/// Declared name, dependencies and ordering hints of an enhancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancerMetadata {
    pub name: String,
    /// Capabilities that must be available before this enhancer runs.
    pub depends_on: Vec<String>,
    /// Capabilities added to the tree once this enhancer has run.
    pub provides: Vec<String>,
    /// Enhancers to run after, when they are in the same list.
    pub after: Vec<String>,
}

impl EnhancerMetadata {
    /// Metadata providing a capability named after the enhancer.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            provides: vec![name.clone()],
            name,
            depends_on: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn depends_on<S: Into<String>>(mut self, capabilities: impl IntoIterator<Item = S>) -> Self {
        self.depends_on.extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Add capabilities beyond the enhancer's own name.
    pub fn provides<S: Into<String>>(mut self, capabilities: impl IntoIterator<Item = S>) -> Self {
        for capability in capabilities {
            let capability = capability.into();
            if !self.provides.contains(&capability) {
                self.provides.push(capability);
            }
        }
        self
    }

    pub fn after<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.after.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether this enhancer provides `capability`.
    pub fn satisfies(&self, capability: &str) -> bool {
        self.name == capability || self.provides.iter().any(|p| p == capability)
    }
}

/// A tree transformer.
pub trait Enhancer: Send + Sync {
    fn metadata(&self) -> EnhancerMetadata;

    /// Return the augmented tree. `tree` is never modified in place.
    fn apply(&self, tree: SignalTree) -> Result<SignalTree>;
}

/// An [`Enhancer`] backed by a closure.
pub struct FnEnhancer<F> {
    metadata: EnhancerMetadata,
    apply: F,
}

impl<F> Enhancer for FnEnhancer<F>
where
    F: Fn(SignalTree) -> Result<SignalTree> + Send + Sync,
{
    fn metadata(&self) -> EnhancerMetadata {
        self.metadata.clone()
    }

    fn apply(&self, tree: SignalTree) -> Result<SignalTree> {
        (self.apply)(tree)
    }
}

impl<F> fmt::Debug for FnEnhancer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEnhancer")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Build an enhancer from metadata and a closure.
///
/// ```rust,ignore
/// let audit = enhancer(EnhancerMetadata::new("audit"), |tree| {
///     Ok(tree.wrap_set(|tree, value, next| {
///         tracing::info!("root replaced");
///         next(tree, value)
///     }))
/// });
/// let tree = tree.with([audit])?;
/// ```
pub fn enhancer<F>(metadata: EnhancerMetadata, apply: F) -> Box<dyn Enhancer>
where
    F: Fn(SignalTree) -> Result<SignalTree> + Send + Sync + 'static,
{
    Box::new(FnEnhancer { metadata, apply })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
