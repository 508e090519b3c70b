//! Accessors: the reactive tree mirroring the state shape.
//!
//! # How Accessors Work
//!
//! An accessor is a handle on one path of the state. It is either an
//! [`ObjectAccessor`] (the value there is a plain object, whose keys are
//! children) or a [`LeafNode`] (anything else: primitives, arrays and
//! opaque values such as dates, maps or functions).
//!
//! 1. Accessors are built lazily. Asking an object accessor for a child
//!    looks in that accessor's own child cache first, so repeated access
//!    returns the same accessor.
//!
//! 2. The child cache lives inside the parent accessor. When a write
//!    replaces a subtree with one of a different shape, the tree drops the
//!    parent's cache entry, and the children die with it.
//!
//! 3. Reads and writes address the tree by path, never by a captured value,
//!    so a handle that outlived a structural replacement still reads and
//!    writes the live state.
//!
//! Arrays are leaves: they are replaced whole, never recursed into.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::enhancers::entities::is_entity_marker;
use crate::error::{Result, TreeError};
use crate::path::Path;
use crate::value::deep::merge_shallow;
use crate::value::{classify, Value};

use super::store::TreeCore;

/// Which variant of [`Accessor`] a value gives rise to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Object,
    Leaf,
}

impl AccessorKind {
    /// Plain objects become object accessors; everything else, including a
    /// missing value and an unmaterialized entity marker, is a leaf.
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            Some(v) if !classify(v).is_leaf() && !is_entity_marker(v) => AccessorKind::Object,
            _ => AccessorKind::Leaf,
        }
    }

    fn name(self) -> &'static str {
        match self {
            AccessorKind::Object => "object",
            AccessorKind::Leaf => "leaf",
        }
    }
}

/// A node of the accessor tree.
#[derive(Clone)]
pub enum Accessor {
    Object(ObjectAccessor),
    Leaf(LeafNode),
}

impl Accessor {
    pub(crate) fn build(core: Weak<TreeCore>, path: Path, kind: AccessorKind) -> Self {
        match kind {
            AccessorKind::Object => Accessor::Object(ObjectAccessor {
                inner: Arc::new(ObjectInner {
                    core,
                    path,
                    children: Mutex::new(HashMap::new()),
                }),
            }),
            AccessorKind::Leaf => Accessor::Leaf(LeafNode {
                inner: Arc::new(LeafInner { core, path }),
            }),
        }
    }

    pub fn kind(&self) -> AccessorKind {
        match self {
            Accessor::Object(_) => AccessorKind::Object,
            Accessor::Leaf(_) => AccessorKind::Leaf,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Accessor::Object(node) => node.path(),
            Accessor::Leaf(leaf) => leaf.path(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Accessor::Leaf(_))
    }

    /// Current value, tracked.
    pub fn get(&self) -> Result<Value> {
        match self {
            Accessor::Object(node) => node.get(),
            Accessor::Leaf(leaf) => leaf.get(),
        }
    }

    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        match self {
            Accessor::Object(node) => node.set(value),
            Accessor::Leaf(leaf) => leaf.set(value),
        }
    }

    /// Apply an updater. Object accessors merge the result one level deep.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        match self {
            Accessor::Object(node) => node.update(f),
            Accessor::Leaf(leaf) => leaf.update(f),
        }
    }

    pub fn child(&self, key: &str) -> Result<Accessor> {
        self.as_object()
            .ok_or_else(|| self.mismatch(AccessorKind::Object))?
            .child(key)
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Accessor::Leaf(leaf) => Some(leaf),
            Accessor::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectAccessor> {
        match self {
            Accessor::Object(node) => Some(node),
            Accessor::Leaf(_) => None,
        }
    }

    pub fn into_leaf(self) -> Result<LeafNode> {
        match self {
            Accessor::Leaf(leaf) => Ok(leaf),
            other => Err(other.mismatch(AccessorKind::Leaf)),
        }
    }

    pub fn into_object(self) -> Result<ObjectAccessor> {
        match self {
            Accessor::Object(node) => Ok(node),
            other => Err(other.mismatch(AccessorKind::Object)),
        }
    }

    /// Whether both handles are the same cached accessor.
    pub fn ptr_eq(&self, other: &Accessor) -> bool {
        match (self, other) {
            (Accessor::Object(a), Accessor::Object(b)) => a.ptr_eq(b),
            (Accessor::Leaf(a), Accessor::Leaf(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    fn mismatch(&self, expected: AccessorKind) -> TreeError {
        TreeError::ShapeMismatch {
            path: self.path().to_string(),
            expected: expected.name(),
            found: self.kind().name(),
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Object(node) => fmt::Debug::fmt(node, f),
            Accessor::Leaf(leaf) => fmt::Debug::fmt(leaf, f),
        }
    }
}

struct ObjectInner {
    core: Weak<TreeCore>,
    path: Path,
    children: Mutex<HashMap<Arc<str>, Accessor>>,
}

/// Accessor for a plain object: its keys are child accessors.
#[derive(Clone)]
pub struct ObjectAccessor {
    inner: Arc<ObjectInner>,
}

impl ObjectAccessor {
    fn core(&self, operation: &'static str) -> Result<Arc<TreeCore>> {
        TreeCore::upgrade(&self.inner.core, operation)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The whole object, tracked.
    pub fn get(&self) -> Result<Value> {
        Ok(self.core("get")?.read(&self.inner.path))
    }

    pub fn get_untracked(&self) -> Result<Value> {
        Ok(self.core("get")?.read_untracked(&self.inner.path))
    }

    /// Replace the whole object.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let action = format!("set:{}", self.inner.path);
        self.core("set")?
            .commit(&action, &self.inner.path, |_| value)
            .map(drop)
    }

    /// Apply `f` to the current object and merge the result into it one
    /// level deep. A non-object result replaces the value.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let action = format!("update:{}", self.inner.path);
        self.core("update")?
            .commit(&action, &self.inner.path, |current| {
                merge_shallow(current, f(current))
            })
            .map(drop)
    }

    /// Keys of the object, tracked.
    pub fn keys(&self) -> Result<Vec<Arc<str>>> {
        let value = self.get()?;
        Ok(value
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Child accessor for `key`, from the cache when its kind still matches
    /// the live value.
    ///
    /// A key missing from the state yields a leaf that reads `Undefined` and
    /// creates the key on first write, unless the tree has strict paths.
    pub fn child(&self, key: &str) -> Result<Accessor> {
        let core = self.core("child")?;
        let path = self.inner.path.child(key);
        let kind = match core.lookup(&path) {
            Some(value) => AccessorKind::of(Some(&value)),
            None if core.config().strict_paths => {
                return Err(TreeError::UnknownKey {
                    path: self.inner.path.to_string(),
                    key: key.to_string(),
                })
            }
            None => AccessorKind::Leaf,
        };

        let mut children = self.inner.children.lock();
        if let Some(existing) = children.get(key) {
            if existing.kind() == kind {
                return Ok(existing.clone());
            }
        }
        let accessor = Accessor::build(self.inner.core.clone(), path, kind);
        children.insert(Arc::from(key), accessor.clone());
        Ok(accessor)
    }

    /// Child that must be a leaf.
    pub fn leaf(&self, key: &str) -> Result<LeafNode> {
        self.child(key)?.into_leaf()
    }

    /// Child that must be an object.
    pub fn node(&self, key: &str) -> Result<ObjectAccessor> {
        self.child(key)?.into_object()
    }

    pub(crate) fn cached_child(&self, key: &str) -> Option<Accessor> {
        self.inner.children.lock().get(key).cloned()
    }

    pub(crate) fn forget_child(&self, key: &str) {
        self.inner.children.lock().remove(key);
    }

    /// Number of children materialized so far.
    pub fn cached_len(&self) -> usize {
        self.inner.children.lock().len()
    }

    pub fn ptr_eq(&self, other: &ObjectAccessor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObjectAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectAccessor")
            .field("path", &self.inner.path.to_string())
            .field("cached_children", &self.cached_len())
            .finish()
    }
}

struct LeafInner {
    core: Weak<TreeCore>,
    path: Path,
}

/// A reactive cell for one terminal value.
///
/// [`LeafNode::call`] is the short form: no argument reads, a function
/// argument updates, any other argument sets. Storing a function value
/// needs the explicit [`LeafNode::set`].
#[derive(Clone)]
pub struct LeafNode {
    inner: Arc<LeafInner>,
}

impl LeafNode {
    fn core(&self, operation: &'static str) -> Result<Arc<TreeCore>> {
        TreeCore::upgrade(&self.inner.core, operation)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current value, tracked by any active reactive context.
    pub fn get(&self) -> Result<Value> {
        Ok(self.core("get")?.read(&self.inner.path))
    }

    pub fn get_untracked(&self) -> Result<Value> {
        Ok(self.core("get")?.read_untracked(&self.inner.path))
    }

    /// Store `value` as is, functions included.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let action = format!("set:{}", self.inner.path);
        self.core("set")?
            .commit(&action, &self.inner.path, |_| value)
            .map(drop)
    }

    /// Replace the value with `f(current)`.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let action = format!("update:{}", self.inner.path);
        self.core("update")?
            .commit(&action, &self.inner.path, f)
            .map(drop)
    }

    /// Read, update or set depending on the argument; returns the value
    /// stored afterwards.
    pub fn call(&self, arg: Option<Value>) -> Result<Value> {
        match arg {
            None => self.get(),
            Some(Value::Function(updater)) => {
                self.update(|current| updater.call(current))?;
                self.get_untracked()
            }
            Some(value) => {
                self.set(value)?;
                self.get_untracked()
            }
        }
    }

    pub fn ptr_eq(&self, other: &LeafNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LeafNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafNode")
            .field("path", &self.inner.path.to_string())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::config::TreeConfig;
    use crate::error::TreeError;
    use crate::tree::SignalTree;
    use crate::value::Value;
    use serde_json::json;

    fn tree() -> SignalTree {
        SignalTree::new(json!({"a": {"b": 1}, "c": [1, 2, 3], "d": "x"})).unwrap()
    }

    #[test]
    fn repeated_access_returns_same_accessor() {
        let tree = tree();
        let first = tree.at("a.b").unwrap();
        let second = tree.at("a.b").unwrap();
        assert!(first.ptr_eq(&second));
        assert!(first.is_leaf());
        assert!(tree.at("a").unwrap().as_object().is_some());
    }

    #[test]
    fn arrays_are_leaves() {
        let tree = tree();
        assert!(tree.at("c").unwrap().is_leaf());
        assert!(tree.at("c").unwrap().child("0").is_err());
    }

    #[test]
    fn value_writes_keep_accessor_identity() {
        let tree = tree();
        let a = tree.node("a").unwrap();
        let b = tree.at("a.b").unwrap();

        tree.leaf("a.b").unwrap().set(2).unwrap();
        a.update(|_| Value::from(json!({"b": 3}))).unwrap();

        assert!(tree.node("a").unwrap().ptr_eq(&a));
        assert!(tree.at("a.b").unwrap().ptr_eq(&b));
        assert_eq!(b.get().unwrap(), Value::from(3));
    }

    #[test]
    fn structural_replacement_regenerates_subtree() {
        let tree = tree();
        let a = tree.node("a").unwrap();
        let b = tree.at("a.b").unwrap();

        a.set(json!({"b": 1, "extra": true})).unwrap();

        let fresh = tree.node("a").unwrap();
        assert!(!fresh.ptr_eq(&a));
        assert!(!tree.at("a.b").unwrap().ptr_eq(&b));
        assert_eq!(fresh.keys().unwrap().len(), 2);
    }

    #[test]
    fn leaf_becoming_object_changes_kind() {
        let tree = tree();
        assert!(tree.at("d").unwrap().is_leaf());

        tree.leaf("d").unwrap().set(json!({"nested": 1})).unwrap();
        let d = tree.at("d").unwrap();
        assert!(!d.is_leaf());
        assert_eq!(d.child("nested").unwrap().get().unwrap(), Value::from(1));
    }

    #[test]
    fn stale_handle_writes_live_state() {
        let tree = tree();
        let stale = tree.leaf("a.b").unwrap();
        tree.node("a").unwrap().set(json!({"b": 0, "z": 0})).unwrap();

        stale.set(9).unwrap();
        assert_eq!(tree.get().unwrap(), Value::from(json!({
            "a": {"b": 9, "z": 0}, "c": [1, 2, 3], "d": "x"
        })));
    }

    #[test]
    fn unknown_key_synthesizes_leaf() {
        let tree = tree();
        let missing = tree.at("a.nope").unwrap();
        assert!(missing.is_leaf());
        assert_eq!(missing.get().unwrap(), Value::Undefined);

        missing.set("created").unwrap();
        assert_eq!(tree.get().unwrap()["a"]["nope"], Value::from("created"));
    }

    #[test]
    fn strict_paths_reject_unknown_keys() {
        let tree = SignalTree::with_config(
            json!({"a": {"b": 1}}),
            TreeConfig::named("strict").strict_paths(true),
        )
        .unwrap();

        assert!(matches!(
            tree.at("a.nope"),
            Err(TreeError::UnknownKey { ref key, .. }) if key == "nope"
        ));
        assert!(tree.at("a.b").is_ok());
    }

    #[test]
    fn call_dispatches_on_argument() {
        let tree = tree();
        let leaf = tree.leaf("a.b").unwrap();

        assert_eq!(leaf.call(None).unwrap(), Value::from(1));
        assert_eq!(leaf.call(Some(Value::from(5))).unwrap(), Value::from(5));

        let add_one = Value::function("add_one", |v: &Value| {
            Value::from(v.as_f64().unwrap_or(0.0) + 1.0)
        });
        assert_eq!(leaf.call(Some(add_one)).unwrap(), Value::from(6));
    }

    #[test]
    fn explicit_set_stores_function_values() {
        let tree = tree();
        let handler = Value::function("handler", |_: &Value| Value::Null);
        let leaf = tree.leaf("d").unwrap();

        leaf.set(handler.clone()).unwrap();
        assert!(leaf.get().unwrap().ptr_eq(&handler));
    }

    #[test]
    fn opaque_values_are_leaves() {
        let tree = SignalTree::new(Value::object([
            ("when", Value::Date(chrono::Utc::now())),
            ("tags", Value::set(vec![Value::from("a")])),
            ("pattern", Value::regexp("a+", "g")),
        ]))
        .unwrap();

        for key in ["when", "tags", "pattern"] {
            assert!(tree.at(key).unwrap().is_leaf(), "{key} should be a leaf");
        }
    }

    #[test]
    fn accessor_kind_follows_classification() {
        use super::AccessorKind;
        use crate::enhancers::entities::entity_map;
        use crate::value::classify;

        let samples = [
            Value::Undefined,
            Value::from(1),
            Value::from("s"),
            Value::array([Value::from(1)]),
            Value::map([(Value::from("k"), Value::from(1))]),
            Value::BigInt(7),
            Value::symbol("s"),
            Value::empty_object(),
            Value::from(json!({"a": {"b": 1}})),
        ];
        for value in &samples {
            let expected = if classify(value).is_leaf() {
                AccessorKind::Leaf
            } else {
                AccessorKind::Object
            };
            assert_eq!(AccessorKind::of(Some(value)), expected, "{value:?}");
        }

        assert_eq!(AccessorKind::of(Some(&entity_map())), AccessorKind::Leaf);
        assert_eq!(AccessorKind::of(None), AccessorKind::Leaf);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let tree = tree();
        assert!(matches!(
            tree.leaf("a"),
            Err(TreeError::ShapeMismatch { expected: "leaf", found: "object", .. })
        ));
        assert!(tree.node("c").is_err());
    }
}
