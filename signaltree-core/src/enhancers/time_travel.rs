//! Time-travel enhancer.
//!
//! # How Time Travel Works
//!
//! 1. On application the current state is recorded as the `@@INIT` entry.
//!
//! 2. A subscription records one [`HistoryEntry`] per notification cycle,
//!    labelled with the tree's last action. States are immutable values, so
//!    an entry shares structure with its neighbours instead of copying.
//!
//! 3. `undo`, `redo` and `jump_to` move the cursor and commit the stored
//!    state under the `@@TIME_TRAVEL` action. The recorder skips cycles whose
//!    last action is a restore, so travelling never rewrites history.
//!
//! 4. Recording after an undo drops the redo branch. Past the capacity the
//!    oldest entry is evicted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::tree::{SignalTree, TreeCore};
use crate::value::Value;

use super::{enhancer, Enhancer, EnhancerMetadata, CORE_CAPABILITY};

pub const CAPABILITY: &str = "time-travel";

/// Action label of commits made by undo, redo and jump.
pub const RESTORE_ACTION: &str = "@@TIME_TRAVEL";

const INIT_ACTION: &str = "@@INIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeTravelConfig {
    pub max_history_size: usize,
}

impl Default for TimeTravelConfig {
    fn default() -> Self {
        Self {
            max_history_size: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub state: Value,
    pub timestamp: DateTime<Utc>,
    pub action: Arc<str>,
    pub payload: Option<Value>,
}

impl HistoryEntry {
    pub fn new(state: Value, action: impl Into<Arc<str>>) -> Self {
        Self {
            state,
            timestamp: Utc::now(),
            action: action.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// A bounded, linear undo history with a cursor on the present entry.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    cursor: Option<usize>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TreeError::InvalidCapacity {
                what: "history",
                value: capacity,
            });
        }
        Ok(Self {
            entries: Vec::with_capacity(capacity.min(64)),
            cursor: None,
            capacity,
        })
    }

    /// Record `entry` as the new present, discarding any redo branch.
    pub fn add_entry(&mut self, entry: HistoryEntry) {
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
        self.entries.push(entry);
        if self.entries.len() > self.capacity {
            let overflow = self.entries.len() - self.capacity;
            self.entries.drain(..overflow);
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    /// Step back one entry. `None` at the oldest entry.
    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        let cursor = self.cursor.filter(|&c| c > 0)?;
        self.cursor = Some(cursor - 1);
        self.entries.get(cursor - 1)
    }

    /// Step forward one entry. `None` at the newest entry.
    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        let next = self.cursor? + 1;
        if next >= self.entries.len() {
            return None;
        }
        self.cursor = Some(next);
        self.entries.get(next)
    }

    /// Move the cursor to `index`. `None` if out of range.
    pub fn jump_to(&mut self, index: usize) -> Option<&HistoryEntry> {
        if index >= self.entries.len() {
            return None;
        }
        self.cursor = Some(index);
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn past(&self) -> &[HistoryEntry] {
        match self.cursor {
            Some(c) => &self.entries[..c],
            None => &[],
        }
    }

    pub fn present(&self) -> Option<&HistoryEntry> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn future(&self) -> &[HistoryEntry] {
        match self.cursor {
            Some(c) => &self.entries[c + 1..],
            None => &[],
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.entries.len())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}

struct TimeTravelState {
    history: Mutex<History>,
}

impl TimeTravelState {
    fn record(&self, core: &TreeCore, state: &Value) {
        let action = core.last_action();
        if &*action == RESTORE_ACTION {
            return;
        }
        let mut history = self.history.lock();
        if history.present().is_some_and(|p| p.state.ptr_eq(state)) {
            return;
        }
        tracing::trace!(tree = %core.name(), action = %action, "recording history entry");
        history.add_entry(HistoryEntry::new(state.clone(), action));
    }
}

/// Time travel with the default history size.
pub fn time_travel() -> Box<dyn Enhancer> {
    time_travel_with(TimeTravelConfig::default())
}

/// Time travel with an explicit configuration.
///
/// Applying it to a tree that already has time travel fails with
/// [`TreeError::AlreadyApplied`].
pub fn time_travel_with(config: TimeTravelConfig) -> Box<dyn Enhancer> {
    enhancer(
        EnhancerMetadata::new(CAPABILITY)
            .depends_on([CORE_CAPABILITY])
            .after([super::batching::CAPABILITY, super::entities::CAPABILITY]),
        move |tree| {
            if tree.has_capability(CAPABILITY) {
                return Err(TreeError::AlreadyApplied {
                    enhancer: CAPABILITY.to_string(),
                });
            }
            let mut history = History::new(config.max_history_size)?;
            history.add_entry(HistoryEntry::new(tree.get_untracked()?, INIT_ACTION));

            let state = Arc::new(TimeTravelState {
                history: Mutex::new(history),
            });
            let recorder = Arc::clone(&state);
            let core = tree.downgrade();
            tree.subscribe(move |value| {
                if let Some(core) = core.upgrade() {
                    recorder.record(&core, value);
                }
            })?
            .detach();

            tracing::debug!(tree = %tree.name(), capacity = config.max_history_size, "time travel enabled");
            Ok(tree.with_extension(state))
        },
    )
}

fn travel(
    tree: &SignalTree,
    operation: &'static str,
    step: impl FnOnce(&mut History) -> Option<Value>,
) -> Result<bool> {
    let state = tree.require_extension::<TimeTravelState>(CAPABILITY, operation)?;
    tree.core().ensure_active(operation)?;
    let Some(target) = step(&mut state.history.lock()) else {
        return Ok(false);
    };
    tree.commit_root(RESTORE_ACTION, move |_| target)?;
    Ok(true)
}

pub trait TimeTravelExt {
    /// Restore the previous entry. Returns whether the cursor moved.
    fn undo(&self) -> Result<bool>;

    /// Restore the next entry. Returns whether the cursor moved.
    fn redo(&self) -> Result<bool>;

    /// Restore the entry at `index`.
    fn jump_to(&self, index: usize) -> Result<bool>;

    /// A copy of the history.
    fn history(&self) -> Result<History>;

    fn can_undo(&self) -> Result<bool>;

    fn can_redo(&self) -> Result<bool>;

    /// Forget all entries and start over from the current state.
    fn reset_history(&self) -> Result<()>;
}

impl TimeTravelExt for SignalTree {
    fn undo(&self) -> Result<bool> {
        travel(self, "undo", |history| history.undo().map(|e| e.state.clone()))
    }

    fn redo(&self) -> Result<bool> {
        travel(self, "redo", |history| history.redo().map(|e| e.state.clone()))
    }

    fn jump_to(&self, index: usize) -> Result<bool> {
        travel(self, "jump_to", |history| {
            history.jump_to(index).map(|e| e.state.clone())
        })
    }

    fn history(&self) -> Result<History> {
        let state = self.require_extension::<TimeTravelState>(CAPABILITY, "history")?;
        let history = state.history.lock().clone();
        Ok(history)
    }

    fn can_undo(&self) -> Result<bool> {
        let state = self.require_extension::<TimeTravelState>(CAPABILITY, "can_undo")?;
        let can = state.history.lock().can_undo();
        Ok(can)
    }

    fn can_redo(&self) -> Result<bool> {
        let state = self.require_extension::<TimeTravelState>(CAPABILITY, "can_redo")?;
        let can = state.history.lock().can_redo();
        Ok(can)
    }

    fn reset_history(&self) -> Result<()> {
        let state = self.require_extension::<TimeTravelState>(CAPABILITY, "reset_history")?;
        let current = self.get_untracked()?;
        let mut history = state.history.lock();
        history.clear();
        history.add_entry(HistoryEntry::new(current, INIT_ACTION));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn count(tree: &SignalTree) -> i64 {
        tree.get().unwrap()["count"].as_i64().unwrap_or(-1)
    }

    fn tree() -> SignalTree {
        SignalTree::new(json!({"count": 0}))
            .unwrap()
            .with([time_travel()])
            .unwrap()
    }

    #[test]
    fn history_bounds_and_branching() {
        let mut history = History::new(3).unwrap();
        for n in 0..5 {
            history.add_entry(HistoryEntry::new(Value::from(n), format!("n{n}")));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(&*history.entries()[0].action, "n2");

        history.undo();
        history.undo();
        assert!(!history.can_undo());
        assert_eq!(history.future().len(), 2);

        history.add_entry(HistoryEntry::new(Value::from(9), "branch"));
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert_eq!(history.past().len(), 1);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            History::new(0),
            Err(TreeError::InvalidCapacity { what: "history", .. })
        ));
        let tree = SignalTree::new(json!({})).unwrap();
        assert!(tree
            .with([time_travel_with(TimeTravelConfig { max_history_size: 0 })])
            .is_err());
    }

    #[test]
    fn undo_redo_restores_states() {
        let tree = tree();
        let leaf = tree.leaf("count").unwrap();
        leaf.set(1).unwrap();
        leaf.set(2).unwrap();

        assert!(tree.undo().unwrap());
        assert_eq!(count(&tree), 1);
        assert!(tree.undo().unwrap());
        assert_eq!(count(&tree), 0);
        assert!(!tree.undo().unwrap());

        assert!(tree.redo().unwrap());
        assert!(tree.redo().unwrap());
        assert_eq!(count(&tree), 2);
        assert!(!tree.redo().unwrap());

        let history = tree.history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(&*history.entries()[0].action, "@@INIT");
        assert_eq!(&*history.entries()[1].action, "set:count");
    }

    #[test]
    fn restores_are_not_recorded() {
        let tree = tree();
        tree.leaf("count").unwrap().set(1).unwrap();
        tree.undo().unwrap();
        assert_eq!(tree.history().unwrap().len(), 2);
        assert_eq!(tree.last_action().as_ref(), RESTORE_ACTION);
    }

    #[test]
    fn write_after_undo_drops_future() {
        let tree = tree();
        let leaf = tree.leaf("count").unwrap();
        leaf.set(1).unwrap();
        leaf.set(2).unwrap();
        tree.undo().unwrap();
        leaf.set(5).unwrap();

        assert!(!tree.can_redo().unwrap());
        let states: Vec<i64> = tree
            .history()
            .unwrap()
            .entries()
            .iter()
            .filter_map(|e| e.state["count"].as_i64())
            .collect();
        assert_eq!(states, vec![0, 1, 5]);
    }

    #[test]
    fn batch_records_one_entry() {
        let tree = tree();
        tree.batch(|| {
            tree.leaf("count").unwrap().set(1).unwrap();
            tree.leaf("count").unwrap().set(2).unwrap();
        })
        .unwrap();
        assert_eq!(tree.history().unwrap().len(), 2);
    }

    #[test]
    fn jump_and_reset() {
        let tree = tree();
        let leaf = tree.leaf("count").unwrap();
        for n in 1..=3 {
            leaf.set(n).unwrap();
        }
        assert!(tree.jump_to(1).unwrap());
        assert_eq!(count(&tree), 1);
        assert!(!tree.jump_to(10).unwrap());

        tree.reset_history().unwrap();
        let history = tree.history().unwrap();
        assert_eq!(history.len(), 1);
        assert!(!tree.can_undo().unwrap());
    }

    #[test]
    fn reapplying_fails() {
        let tree = tree();
        assert!(matches!(
            tree.with([time_travel()]),
            Err(TreeError::AlreadyApplied { .. })
        ));
    }

    #[test]
    fn undo_after_destroy_fails() {
        let tree = tree();
        tree.leaf("count").unwrap().set(1).unwrap();
        tree.destroy();
        assert!(matches!(tree.undo(), Err(TreeError::Destroyed { .. })));
    }

    #[test]
    fn entity_maps_are_materialized_before_the_first_entry() {
        use crate::enhancers::entities::{entities, entity_map, EntitiesExt};

        let tree = SignalTree::new(Value::object([("items", entity_map())]))
            .unwrap()
            .with([time_travel(), entities()])
            .unwrap();
        let items = tree.entities("items").unwrap();
        items.add_one(json!({"id": 1})).unwrap();

        assert!(tree.undo().unwrap());
        assert!(!tree.undo().unwrap());
        assert_eq!(items.count().unwrap(), 0);

        items.add_one(json!({"id": 2})).unwrap();
        assert_eq!(items.ids().unwrap(), vec![Value::from(2)]);
    }
}
