//! Reactive Primitives
//!
//! Signals, memos and effects: the fine-grained reactivity the state tree is
//! built on. The tree consumes these primitives; it never reaches into the
//! runtime's bookkeeping directly.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Reads inside a tracking
//! context register a dependency; writes notify dependents.
//!
//! ## Memos
//!
//! A Memo is a lazily recomputed, cached derivation of other sources.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation re-run eagerly whenever one of
//! its dependencies changes.
//!
//! ## Batches
//!
//! [`Runtime::batch`] coalesces change notifications. Scopes nest, and
//! dependents are notified once when the outermost scope returns.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local context stack: a read checks for
//! an active frame and, if one exists, records the edge with the runtime.

mod signal;
mod context;
mod subscriber;
mod memo;
mod effect;
mod runtime;

pub use signal::Signal;
pub use context::ReactiveContext;
pub use subscriber::SubscriberId;
pub use memo::{Memo, MemoState};
pub use effect::Effect;
pub use runtime::{NotifyJob, Reactive, ReactiveHandle, Runtime};

