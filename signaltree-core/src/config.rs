//! Tree configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::path::PathCache;

/// Options for a [`crate::SignalTree`].
///
/// Every field has a default, so a partial JSON object deserializes:
///
/// ```rust,ignore
/// let config: TreeConfig = serde_json::from_str(r#"{"strict_paths": true}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Name used in log events and error messages.
    pub name: String,
    /// Capacity of the per-tree parsed path cache.
    pub path_cache_size: usize,
    /// Reject unknown keys instead of synthesizing leaves for them.
    pub strict_paths: bool,
    /// Emit a debug event for every commit.
    pub debug: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            name: "SignalTree".to_string(),
            path_cache_size: PathCache::DEFAULT_CAPACITY,
            strict_paths: false,
            debug: false,
        }
    }
}

impl TreeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn path_cache_size(mut self, size: usize) -> Self {
        self.path_cache_size = size;
        self
    }

    pub fn strict_paths(mut self, strict: bool) -> Self {
        self.strict_paths = strict;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Check the configuration before a tree is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.path_cache_size == 0 {
            return Err(TreeError::InvalidCapacity {
                what: "path cache",
                value: 0,
            });
        }
        Ok(())
    }
}
