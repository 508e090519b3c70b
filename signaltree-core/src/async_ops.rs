//! Async operation tracking.
//!
//! The tree itself is synchronous. [`AsyncTracker`] runs a future outside
//! it and commits `{ data, loading, error }` at a path when the future
//! settles. Each run takes a generation number; a run that finishes after a
//! newer one has started is discarded, so the last started call wins.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TreeError};
use crate::path::Path;
use crate::tree::SignalTree;
use crate::value::Value;

/// How a tracked run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncOutcome {
    Completed(Value),
    Failed(String),
    /// A newer run started before this one finished; nothing was written.
    Stale,
}

/// Loading state for one path.
#[derive(Clone)]
pub struct AsyncTracker {
    tree: SignalTree,
    path: Path,
    generation: Arc<AtomicU64>,
}

fn slot(data: Value, loading: bool, error: Value) -> Value {
    Value::object([
        ("data", data),
        ("loading", Value::Bool(loading)),
        ("error", error),
    ])
}

impl AsyncTracker {
    /// Track `path`, initializing it to `{ data: null, loading: false,
    /// error: null }` unless it already holds that shape.
    pub fn new(tree: &SignalTree, path: &str) -> Result<Self> {
        let path = tree.core().parse_path(path);
        let label = format!("async:init:{path}");
        tree.core().commit(&label, &path, |current| {
            if current.get("loading").is_some() {
                current.clone()
            } else {
                slot(Value::Null, false, Value::Null)
            }
        })?;
        Ok(Self {
            tree: tree.clone(),
            path,
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `{ data, loading, error }` object. Tracked.
    pub fn state(&self) -> Result<Value> {
        self.tree.core().ensure_active("async state")?;
        Ok(self.tree.core().read(&self.path))
    }

    pub fn data(&self) -> Result<Value> {
        Ok(self.state()?.get("data").cloned().unwrap_or_default())
    }

    pub fn is_loading(&self) -> Result<bool> {
        Ok(self.state()?.get("loading").and_then(Value::as_bool).unwrap_or(false))
    }

    pub fn error(&self) -> Result<Option<String>> {
        Ok(self
            .state()?
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn write(&self, stage: &str, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let label = format!("async:{stage}:{}", self.path);
        self.tree.core().commit(&label, &self.path, f).map(drop)
    }

    fn begin(&self) -> Result<u64> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.write("start", |current| {
            let data = current.get("data").cloned().unwrap_or(Value::Null);
            slot(data, true, Value::Null)
        })?;
        Ok(generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        let current = self.generation.load(Ordering::SeqCst) == generation;
        if !current {
            tracing::debug!(path = %self.path, generation, "discarding stale async result");
        }
        current
    }

    fn settle(&self, result: std::result::Result<Value, String>) -> Result<AsyncOutcome> {
        match result {
            Ok(data) => {
                let stored = data.clone();
                self.write("done", move |_| slot(stored, false, Value::Null))?;
                Ok(AsyncOutcome::Completed(data))
            }
            Err(message) => {
                let stored = Value::from(message.as_str());
                self.write("error", move |current| {
                    let data = current.get("data").cloned().unwrap_or(Value::Null);
                    slot(data, false, stored)
                })?;
                Ok(AsyncOutcome::Failed(message))
            }
        }
    }

    /// Run `future`, committing its result unless a newer run has started.
    pub async fn run<F, E>(&self, future: F) -> Result<AsyncOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: fmt::Display,
    {
        let generation = self.begin()?;
        let result = future.await.map_err(|e| e.to_string());
        if !self.is_current(generation) {
            return Ok(AsyncOutcome::Stale);
        }
        self.settle(result)
    }

    /// Like [`run`](Self::run), but gives up after `limit`.
    ///
    /// A timeout is recorded in the `error` field and returned as
    /// [`TreeError::Timeout`].
    pub async fn run_with_timeout<F, E>(&self, limit: Duration, future: F) -> Result<AsyncOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: fmt::Display,
    {
        let generation = self.begin()?;
        let millis = limit.as_millis() as u64;
        let result = match tokio::time::timeout(limit, future).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => {
                if !self.is_current(generation) {
                    return Ok(AsyncOutcome::Stale);
                }
                self.settle(Err(TreeError::Timeout { millis }.to_string()))?;
                return Err(TreeError::Timeout { millis });
            }
        };
        if !self.is_current(generation) {
            return Ok(AsyncOutcome::Stale);
        }
        self.settle(result)
    }
}

impl fmt::Debug for AsyncTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTracker")
            .field("path", &self.path.to_string())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
