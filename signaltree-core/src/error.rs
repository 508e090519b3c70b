//! Error types for tree construction and operations.

use thiserror::Error;

/// Errors raised by the state tree and its enhancers.
///
/// Every message names the operation or contract that was violated, so a
/// caller can tell what went wrong without reading the source.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    #[error("tree '{tree}' has been destroyed; {operation} is not available")]
    Destroyed { tree: String, operation: &'static str },

    #[error("enhancer '{enhancer}' depends on capability '{capability}', which is neither available nor provided by another enhancer")]
    MissingDependency { enhancer: String, capability: String },

    #[error("enhancer dependency cycle among: {}", .enhancers.join(", "))]
    DependencyCycle { enhancers: Vec<String> },

    #[error("enhancer '{enhancer}' has already been applied to this tree")]
    AlreadyApplied { enhancer: String },

    #[error("capability '{capability}' is required for {operation}; apply the matching enhancer first")]
    CapabilityMissing { capability: String, operation: &'static str },

    #[error("entities enhancer not applied: no materialized entity map at '{path}'")]
    EntitiesNotApplied { path: String },

    #[error("no entity with id '{id}' in collection '{path}'")]
    EntityNotFound { path: String, id: String },

    #[error("cannot re-key record in collection '{path}': id '{id}' is already taken")]
    EntityIdConflict { path: String, id: String },

    #[error("record has no usable id for collection '{path}' (id field '{field}')")]
    MissingEntityId { path: String, field: String },

    #[error("invalid {what} capacity {value}: must be at least 1")]
    InvalidCapacity { what: &'static str, value: usize },

    #[error("unknown key '{key}' under '{path}' (strict paths enabled)")]
    UnknownKey { path: String, key: String },

    #[error("expected {expected} at '{path}', found {found}")]
    ShapeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Failed to deserialize: {0}")]
    Deserialize(String),

    #[error("Failed to serialize: {0}")]
    Serialize(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("enhancer '{enhancer}' failed: {message}")]
    Enhancer { enhancer: String, message: String },
}

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        TreeError::Deserialize(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TreeError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        TreeError::Deserialize(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for TreeError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        TreeError::Serialize(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_contract() {
        let err = TreeError::MissingDependency {
            enhancer: "timeTravel".into(),
            capability: "batching".into(),
        };
        let message = err.to_string();
        assert!(message.contains("timeTravel"));
        assert!(message.contains("batching"));

        let err = TreeError::EntitiesNotApplied { path: "users".into() };
        assert!(err.to_string().starts_with("entities enhancer not applied"));
    }

    #[test]
    fn json_errors_become_deserialize_errors() {
        let err: TreeError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("Failed to deserialize:"));
    }
}
