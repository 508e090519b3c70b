//! Deep utilities over [`Value`] trees.
//!
//! - [`deep_clone`]: a copy that shares no container with the original.
//! - [`deep_equal`]: structural equality.
//! - [`shallow_diff`]: top-level key changes between two objects.
//! - [`same_shape`]: whether two values give rise to the same accessor tree.
//! - [`get_in`] / [`set_in`]: path reads and structurally shared path writes.

use std::sync::Arc;

use super::{classify, ObjectMap, Value};

/// Copy a value, allocating fresh containers all the way down.
///
/// Opaque values are copied whole; functions keep their identity since a
/// closure cannot be duplicated.
pub fn deep_clone(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(Arc::new(
            map.iter().map(|(k, v)| (k.clone(), deep_clone(v))).collect(),
        )),
        Value::Array(items) => Value::Array(Arc::new(items.iter().map(deep_clone).collect())),
        Value::Set(items) => Value::Set(Arc::new(items.iter().map(deep_clone).collect())),
        Value::Map(entries) => Value::Map(Arc::new(
            entries
                .iter()
                .map(|(k, v)| (deep_clone(k), deep_clone(v)))
                .collect(),
        )),
        other => other.clone(),
    }
}

/// Structural equality.
///
/// NaN equals NaN, object key order is ignored, map and set membership is
/// compared without regard to insertion order, and functions compare by
/// identity.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (
            Value::RegExp { source: s1, flags: f1 },
            Value::RegExp { source: s2, flags: f2 },
        ) => s1 == s2 && f1 == f2,
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Array(x), Value::Array(y)) => {
            Arc::ptr_eq(x, y)
                || (x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| deep_equal(l, r)))
        }
        (Value::Object(x), Value::Object(y)) => {
            Arc::ptr_eq(x, y)
                || (x.len() == y.len()
                    && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| deep_equal(v, w))))
        }
        (Value::Set(x), Value::Set(y)) => {
            Arc::ptr_eq(x, y)
                || (x.len() == y.len() && x.iter().all(|v| y.iter().any(|w| deep_equal(v, w))))
        }
        (Value::Map(x), Value::Map(y)) => {
            Arc::ptr_eq(x, y)
                || (x.len() == y.len()
                    && x.iter().all(|(k, v)| {
                        y.iter()
                            .any(|(k2, v2)| deep_equal(k, k2) && deep_equal(v, v2))
                    }))
        }
        _ => false,
    }
}

/// Top-level differences between two values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShallowDiff {
    pub added: Vec<Arc<str>>,
    pub removed: Vec<Arc<str>>,
    /// Keys present on both sides whose values are not the same reference.
    pub changed: Vec<Arc<str>>,
    /// Set when either side is not an object and the two differ.
    pub replaced: bool,
}

impl ShallowDiff {
    pub fn is_empty(&self) -> bool {
        !self.replaced && self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Every key touched, in added/removed/changed order.
    pub fn touched_keys(&self) -> Vec<Arc<str>> {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.changed)
            .cloned()
            .collect()
    }
}

/// Compare the top level of two values by reference.
pub fn shallow_diff(before: &Value, after: &Value) -> ShallowDiff {
    let (Some(old), Some(new)) = (before.as_object(), after.as_object()) else {
        return ShallowDiff {
            replaced: !before.ptr_eq(after),
            ..ShallowDiff::default()
        };
    };

    let mut diff = ShallowDiff::default();
    for (key, value) in new {
        match old.get(key) {
            None => diff.added.push(key.clone()),
            Some(prev) if !prev.ptr_eq(value) => diff.changed.push(key.clone()),
            Some(_) => {}
        }
    }
    diff.removed = old
        .keys()
        .filter(|key| !new.contains_key(*key))
        .cloned()
        .collect();
    diff
}

/// Whether two values produce the same accessor structure: the same plain
/// object keys at every level, with leaves anywhere else.
pub fn same_shape(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            Arc::ptr_eq(x, y)
                || (x.len() == y.len()
                    && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| same_shape(v, w))))
        }
        _ => classify(a).is_leaf() && classify(b).is_leaf(),
    }
}

/// Read the value at a path.
pub fn get_in<'a>(value: &'a Value, path: &[Arc<str>]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

/// Write `new` at `path`, rebuilding only the objects along the path.
///
/// Every sibling subtree of the path keeps its identity. Missing or
/// non-object intermediates are replaced by fresh objects.
pub fn set_in(value: &Value, path: &[Arc<str>], new: Value) -> Value {
    let Some((head, rest)) = path.split_first() else {
        return new;
    };
    let mut map: ObjectMap = value.as_object().cloned().unwrap_or_default();
    let child = map.get(head).cloned().unwrap_or_default();
    map.insert(head.clone(), set_in(&child, rest, new));
    Value::Object(Arc::new(map))
}

/// Merge `patch` into `base` one level deep when both are objects;
/// otherwise `patch` replaces `base`.
pub fn merge_shallow(base: &Value, patch: Value) -> Value {
    match (base.as_object(), patch.as_object()) {
        (Some(old), Some(new)) => {
            let mut merged = old.clone();
            for (k, v) in new {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(Arc::new(merged))
        }
        _ => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn deep_clone_shares_nothing() {
        let original = Value::from(json!({"a": {"b": [1, 2]}, "c": "x"}));
        let copy = deep_clone(&original);

        assert_eq!(copy, original);
        assert!(!copy.ptr_eq(&original));
        assert!(!copy["a"].ptr_eq(&original["a"]));
        assert!(!copy["a"]["b"].ptr_eq(&original["a"]["b"]));
    }

    #[test]
    fn deep_equal_handles_nan_and_key_order() {
        let a = Value::object([("x", Value::Number(f64::NAN)), ("y", Value::from(1))]);
        let b = Value::object([("y", Value::from(1)), ("x", Value::Number(f64::NAN))]);
        assert!(deep_equal(&a, &b));
        assert!(!deep_equal(&a, &Value::from(json!({"x": 1, "y": 1}))));
    }

    #[test]
    fn deep_equal_compares_sets_by_membership() {
        let a = Value::set(vec![Value::from(1), Value::from(2)]);
        let b = Value::set(vec![Value::from(2), Value::from(1)]);
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn shallow_diff_reports_top_level_keys() {
        let before = Value::from(json!({"a": 1, "b": {"c": 2}, "d": true}));
        let after = before
            .with_key("a", 5)
            .with_key("e", "new");
        let after = match after {
            Value::Object(map) => {
                let mut map = (*map).clone();
                map.shift_remove("d");
                Value::from(map)
            }
            other => other,
        };

        let diff = shallow_diff(&before, &after);
        assert_eq!(diff.changed, vec![key("a")]);
        assert_eq!(diff.added, vec![key("e")]);
        assert_eq!(diff.removed, vec![key("d")]);
        assert!(!diff.replaced);
    }

    #[test]
    fn shallow_diff_of_primitives() {
        assert!(shallow_diff(&Value::from(1), &Value::from(1)).is_empty());
        assert!(shallow_diff(&Value::from(1), &Value::from(2)).replaced);
    }

    #[test]
    fn same_shape_ignores_leaf_values() {
        let a = Value::from(json!({"a": {"b": 1}, "c": [1]}));
        let b = Value::from(json!({"a": {"b": "text"}, "c": [1, 2, 3]}));
        let c = Value::from(json!({"a": {"b": 1, "z": 0}, "c": [1]}));
        let d = Value::from(json!({"a": 3, "c": [1]}));

        assert!(same_shape(&a, &b));
        assert!(!same_shape(&a, &c));
        assert!(!same_shape(&a, &d));
    }

    #[test]
    fn set_in_rebuilds_only_the_spine() {
        let state = Value::from(json!({"a": {"b": 1, "x": {"y": 0}}, "c": [1, 2, 3]}));
        let next = set_in(&state, &[key("a"), key("b")], Value::from(2));

        assert_eq!(next["a"]["b"], Value::from(2));
        assert!(next["c"].ptr_eq(&state["c"]));
        assert!(next["a"]["x"].ptr_eq(&state["a"]["x"]));
        assert!(!next["a"].ptr_eq(&state["a"]));
    }

    #[test]
    fn set_in_creates_missing_intermediates() {
        let next = set_in(&Value::empty_object(), &[key("p"), key("q")], Value::from(true));
        assert_eq!(next, Value::from(json!({"p": {"q": true}})));
    }

    #[test]
    fn get_in_walks_objects() {
        let state = Value::from(json!({"a": {"b": 1}}));
        assert_eq!(get_in(&state, &[key("a"), key("b")]), Some(&Value::from(1)));
        assert_eq!(get_in(&state, &[key("a"), key("zz")]), None);
        assert_eq!(get_in(&state, &[]), Some(&state));
    }

    #[test]
    fn merge_shallow_preserves_missing_keys() {
        let base = Value::from(json!({"a": 1, "b": {"c": 2}}));
        let merged = merge_shallow(&base, Value::from(json!({"a": 9})));
        assert_eq!(merged, Value::from(json!({"a": 9, "b": {"c": 2}})));
        assert!(merged["b"].ptr_eq(&base["b"]));

        assert_eq!(merge_shallow(&Value::from(1), Value::from(2)), Value::from(2));
    }
}
