//! SignalTree Core
//!
//! This crate provides a reactive, hierarchical state tree. A nested plain
//! value becomes a tree of lazily built accessors: objects are navigable
//! nodes, everything else is a leaf that can be read, set and updated.
//! Writes are immutable and share structure with the previous state.
//!
//! It implements:
//!
//! - Reactive primitives (signals, memos, effects, batches)
//! - Path-addressed accessors with an identity-preserving cache
//! - A composable enhancer pipeline with dependency ordering
//! - Built-in enhancers: batching, memoization, entities, time travel,
//!   serialization, devtools logging and effects
//!
//! # Architecture
//!
//! - `reactive`: signals, memos, effects and dependency tracking
//! - `value`: the immutable [`Value`] model and deep/shallow helpers
//! - `path`: dotted paths and the per-tree LRU path cache
//! - `tree`: [`SignalTree`], accessors, method layers and lifecycle
//! - `enhancers`: the enhancer trait, ordering and built-in enhancers
//! - `async_ops`: last-write-wins tracking of async loads
//!
//! # Example
//!
//! ```rust,ignore
//! use signaltree_core::{time_travel, SignalTree, TimeTravelExt, Value};
//! use serde_json::json;
//!
//! let tree = SignalTree::new(json!({"user": {"name": "ada"}, "count": 0}))?
//!     .with([time_travel()])?;
//!
//! tree.leaf("count")?.set(1)?;
//! tree.node("user")?.update(|_| json!({"age": 36}).into())?;
//!
//! tree.undo()?;
//! assert_eq!(tree.get()?["user"]["age"], Value::Undefined);
//! ```

pub mod async_ops;
pub mod config;
pub mod enhancers;
pub mod error;
pub mod path;
pub mod reactive;
pub mod tree;
pub mod value;

pub use crate::async_ops::{AsyncOutcome, AsyncTracker};
pub use crate::config::TreeConfig;
pub use crate::enhancers::{
    batching, devtools, devtools_with, effects, enhancer, entities, entity_map, entity_map_with,
    memoization, resolve_enhancer_order, resolve_order, serialization, serialization_with,
    time_travel, time_travel_with, ActionRecord, BatchingExt, DevtoolsConfig, DevtoolsExt,
    EffectsExt, Enhancer, EnhancerMetadata, EntitiesExt, EntityCollection, EntityConfig, EntityRef,
    History, HistoryEntry, MemoizationExt, MemoryStorage, SerializationConfig, SerializationExt,
    StorageAdapter, TimeTravelConfig, TimeTravelExt,
};
pub use crate::error::{Result, TreeError};
pub use crate::path::{Path, PathCacheStats};
pub use crate::tree::{
    Accessor, AccessorKind, LeafNode, ObjectAccessor, SignalTree, Subscription, TreePhase,
};
pub use crate::value::{Callable, ObjectMap, Value};
