//! Devtools enhancer: an action log over `tracing`.
//!
//! Every notification cycle is recorded as an [`ActionRecord`] named after
//! the tree's last action, with the top-level keys it touched. Whole-tree
//! `set` and `update` calls are also timed. Records go to a bounded buffer
//! and are emitted as `info` events on the `signaltree::devtools` target.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::tree::SignalTree;
use crate::value::deep::shallow_diff;
use crate::value::Value;

use super::{enhancer, Enhancer, EnhancerMetadata, CORE_CAPABILITY};

pub const CAPABILITY: &str = "devtools";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevtoolsConfig {
    /// Label used in log events. Defaults to the tree name.
    pub name: Option<String>,
    pub max_actions: usize,
}

impl Default for DevtoolsConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_actions: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub name: Arc<str>,
    pub timestamp: DateTime<Utc>,
    /// Time spent in a whole-tree `set` or `update`; `None` for other writes.
    pub duration: Option<Duration>,
    pub changed_keys: Vec<Arc<str>>,
}

struct DevtoolsState {
    label: String,
    max_actions: usize,
    actions: Mutex<VecDeque<ActionRecord>>,
    last_state: Mutex<Value>,
    pending_duration: Mutex<Option<Duration>>,
}

impl DevtoolsState {
    fn timed(&self, f: impl FnOnce() -> Result<()>) -> Result<()> {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        let mut pending = self.pending_duration.lock();
        *pending = Some(pending.map_or(elapsed, |d| d + elapsed));
        result
    }

    fn record(&self, action: Arc<str>, state: &Value) {
        let changed_keys = {
            let mut last = self.last_state.lock();
            let diff = shallow_diff(&last, state);
            *last = state.clone();
            diff.touched_keys()
        };
        let record = ActionRecord {
            name: action,
            timestamp: Utc::now(),
            duration: self.pending_duration.lock().take(),
            changed_keys,
        };

        tracing::info!(
            target: "signaltree::devtools",
            tree = %self.label,
            action = %record.name,
            changed = ?record.changed_keys,
            duration_us = record.duration.map(|d| d.as_micros() as u64),
            "action"
        );

        let mut actions = self.actions.lock();
        if actions.len() == self.max_actions {
            actions.pop_front();
        }
        actions.push_back(record);
    }
}

/// Devtools with default settings. Applying it again is a no-op.
pub fn devtools() -> Box<dyn Enhancer> {
    devtools_with(DevtoolsConfig::default())
}

pub fn devtools_with(config: DevtoolsConfig) -> Box<dyn Enhancer> {
    enhancer(
        EnhancerMetadata::new(CAPABILITY)
            .depends_on([CORE_CAPABILITY])
            .after([super::batching::CAPABILITY]),
        move |tree| {
            if tree.has_capability(CAPABILITY) {
                return Ok(tree);
            }
            if config.max_actions == 0 {
                return Err(TreeError::InvalidCapacity {
                    what: "devtools action log",
                    value: 0,
                });
            }
            let state = Arc::new(DevtoolsState {
                label: config.name.clone().unwrap_or_else(|| tree.name().to_string()),
                max_actions: config.max_actions,
                actions: Mutex::new(VecDeque::new()),
                last_state: Mutex::new(tree.get_untracked()?),
                pending_duration: Mutex::new(None),
            });

            let recorder = Arc::clone(&state);
            let core = tree.downgrade();
            tree.subscribe(move |value| {
                if let Some(core) = core.upgrade() {
                    recorder.record(core.last_action(), value);
                }
            })?
            .detach();

            let set_state = Arc::clone(&state);
            let update_state = Arc::clone(&state);
            Ok(tree
                .wrap_set(move |tree, value, next| set_state.timed(|| next(tree, value)))
                .wrap_update(move |tree, updater, next| update_state.timed(|| next(tree, updater)))
                .with_extension(state))
        },
    )
}

pub trait DevtoolsExt {
    /// Recorded actions, oldest first.
    fn actions(&self) -> Result<Vec<ActionRecord>>;

    fn clear_actions(&self) -> Result<()>;
}

impl DevtoolsExt for SignalTree {
    fn actions(&self) -> Result<Vec<ActionRecord>> {
        let state = self.require_extension::<DevtoolsState>(CAPABILITY, "actions")?;
        let actions = state.actions.lock().iter().cloned().collect();
        Ok(actions)
    }

    fn clear_actions(&self) -> Result<()> {
        let state = self.require_extension::<DevtoolsState>(CAPABILITY, "clear_actions")?;
        state.actions.lock().clear();
        Ok(())
    }
}
