//! Entity maps: normalized id-to-record collections.
//!
//! # How Entity Maps Work
//!
//! 1. [`entity_map()`] returns an inert marker value placed in the initial
//!    state: `{"__isEntityMap": true, "config": {...}}`. Until the entities
//!    enhancer runs it is an ordinary leaf.
//!
//! 2. The [`entities()`] enhancer finds every marker in the state and
//!    replaces it with the materialized form `{"byId": {...}, "ids": [...]}`
//!    in a single commit, remembering each collection's id configuration.
//!
//! 3. [`EntitiesExt::entities`] returns an [`EntityCollection`] for a
//!    materialized path. Every mutation rebuilds `byId` and `ids` together,
//!    so `ids` always lists each key of `byId` exactly once, in order.
//!
//! `byId` keys are the string form of the id: strings as is, integral
//! numbers without a fractional part, bigints in decimal.
//!
//! Adding a record whose id already exists replaces it where it stands
//! (last write wins).

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{Result, TreeError};
use crate::path::Path;
use crate::tree::{SignalTree, TreeCore};
use crate::value::deep::{merge_shallow, set_in};
use crate::value::{Callable, ObjectMap, Value};

use super::{enhancer, Enhancer, EnhancerMetadata, CORE_CAPABILITY};

pub const CAPABILITY: &str = "entities";

const MARKER_KEY: &str = "__isEntityMap";
const DEFAULT_ID_FIELD: &str = "id";

/// How a collection finds each record's id.
#[derive(Debug, Clone, Default)]
pub struct EntityConfig {
    /// Field holding the id. Defaults to `"id"`.
    pub id_field: Option<String>,
    /// Selector called with the record; takes precedence over `id_field`.
    pub select_id: Option<Callable>,
}

impl EntityConfig {
    pub fn id_field(field: impl Into<String>) -> Self {
        Self {
            id_field: Some(field.into()),
            select_id: None,
        }
    }

    pub fn select_id<F>(selector: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            id_field: None,
            select_id: Some(Callable::new("selectId", selector)),
        }
    }

    fn field(&self) -> &str {
        self.id_field.as_deref().unwrap_or(DEFAULT_ID_FIELD)
    }

    fn describe(&self) -> String {
        match &self.select_id {
            Some(selector) => format!("selector {}", selector.name()),
            None => self.field().to_string(),
        }
    }

    fn id_of(&self, record: &Value) -> Option<Value> {
        let id = match &self.select_id {
            Some(selector) => selector.call(record),
            None => record.get(self.field()).cloned()?,
        };
        (!id.is_nullish()).then_some(id)
    }

    fn to_value(&self) -> Value {
        let mut config = ObjectMap::new();
        if let Some(field) = &self.id_field {
            config.insert(Arc::from("idField"), Value::from(field.as_str()));
        }
        if let Some(selector) = &self.select_id {
            config.insert(Arc::from("selectId"), Value::Function(selector.clone()));
        }
        Value::from(config)
    }

    fn from_marker(marker: &Value) -> Self {
        let config = marker.get("config");
        Self {
            id_field: config
                .and_then(|c| c.get("idField"))
                .and_then(Value::as_str)
                .map(str::to_string),
            select_id: config
                .and_then(|c| c.get("selectId"))
                .and_then(Value::as_callable)
                .cloned(),
        }
    }
}

/// Marker for an entity collection keyed by the `id` field.
pub fn entity_map() -> Value {
    entity_map_with(EntityConfig::default())
}

/// Marker for an entity collection with a custom id field or selector.
pub fn entity_map_with(config: EntityConfig) -> Value {
    Value::object([
        (MARKER_KEY, Value::Bool(true)),
        ("config", config.to_value()),
    ])
}

/// Whether `value` is an unmaterialized entity map marker.
pub fn is_entity_marker(value: &Value) -> bool {
    value.get(MARKER_KEY).and_then(Value::as_bool) == Some(true)
}

/// String form of an id, used as the `byId` key.
pub fn id_key(id: &Value) -> Option<Arc<str>> {
    match id {
        Value::String(s) => Some(Arc::clone(s)),
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
            Some(Arc::from((*n as i64).to_string()))
        }
        Value::Number(n) if n.is_finite() => Some(Arc::from(n.to_string())),
        Value::BigInt(b) => Some(Arc::from(b.to_string())),
        _ => None,
    }
}

fn empty_collection() -> Value {
    write_collection(ObjectMap::new(), Vec::new())
}

fn write_collection(by_id: ObjectMap, ids: Vec<Value>) -> Value {
    Value::object([
        ("byId", Value::Object(Arc::new(by_id))),
        ("ids", Value::Array(Arc::new(ids))),
    ])
}

fn read_collection(value: &Value) -> Option<(ObjectMap, Vec<Value>)> {
    let by_id = value.get("byId")?.as_object()?.clone();
    let ids = value.get("ids")?.as_array()?.to_vec();
    Some((by_id, ids))
}

fn find_markers(value: &Value, path: Path, found: &mut Vec<(Path, EntityConfig)>) {
    if is_entity_marker(value) {
        found.push((path, EntityConfig::from_marker(value)));
        return;
    }
    if let Some(map) = value.as_object() {
        for (key, child) in map {
            find_markers(child, path.child(Arc::clone(key)), found);
        }
    }
}

/// Collections materialized on one tree.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    collections: RwLock<IndexMap<Path, EntityConfig>>,
}

impl EntityRegistry {
    /// Paths of every registered collection.
    pub fn paths(&self) -> Vec<Path> {
        self.collections.read().keys().cloned().collect()
    }
}

fn materialize(tree: &SignalTree, registry: &EntityRegistry, markers: Vec<(Path, EntityConfig)>) -> Result<()> {
    if markers.is_empty() {
        return Ok(());
    }
    let paths: Vec<Path> = markers.iter().map(|(path, _)| path.clone()).collect();
    tree.commit_root("@@ENTITIES_INIT", |current| {
        paths.iter().fold(current.clone(), |state, path| {
            set_in(&state, path.segments(), empty_collection())
        })
    })?;

    let mut collections = registry.collections.write();
    for (path, config) in markers {
        tracing::debug!(tree = %tree.name(), path = %path, id = %config.describe(), "materialized entity map");
        collections.insert(path, config);
    }
    Ok(())
}

/// The entities enhancer. Applying it again is a no-op.
pub fn entities() -> Box<dyn Enhancer> {
    enhancer(
        EnhancerMetadata::new(CAPABILITY).depends_on([CORE_CAPABILITY]),
        |tree| {
            if tree.has_capability(CAPABILITY) {
                return Ok(tree);
            }
            let registry = Arc::new(EntityRegistry::default());
            let mut markers = Vec::new();
            find_markers(&tree.get_untracked()?, Path::root(), &mut markers);
            materialize(&tree, &registry, markers)?;
            Ok(tree.with_extension(registry))
        },
    )
}

pub trait EntitiesExt {
    /// The entity collection at `path`.
    ///
    /// A marker written after the enhancer ran is materialized on first
    /// access. Without the enhancer, or at a path holding no entity map,
    /// this fails with [`TreeError::EntitiesNotApplied`].
    fn entities(&self, path: &str) -> Result<EntityCollection>;
}

impl EntitiesExt for SignalTree {
    fn entities(&self, path: &str) -> Result<EntityCollection> {
        self.core().ensure_active("entities")?;
        let not_applied = || TreeError::EntitiesNotApplied {
            path: path.to_string(),
        };
        let registry = self.extension::<EntityRegistry>().ok_or_else(not_applied)?;
        let parsed = self.core().parse_path(path);

        let registered = registry.collections.read().get(&parsed).cloned();
        let config = match registered {
            Some(config) => config,
            None => {
                let current = self.core().lookup(&parsed).ok_or_else(not_applied)?;
                if !is_entity_marker(&current) {
                    return Err(not_applied());
                }
                let config = EntityConfig::from_marker(&current);
                materialize(self, &registry, vec![(parsed.clone(), config.clone())])?;
                config
            }
        };

        Ok(EntityCollection {
            core: self.downgrade(),
            path: parsed,
            config,
        })
    }
}

/// CRUD handle on one materialized entity map.
#[derive(Clone)]
pub struct EntityCollection {
    core: Weak<TreeCore>,
    path: Path,
    config: EntityConfig,
}

impl EntityCollection {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn not_applied(&self) -> TreeError {
        TreeError::EntitiesNotApplied {
            path: self.path.to_string(),
        }
    }

    fn read(&self, tracked: bool) -> Result<(ObjectMap, Vec<Value>)> {
        let core = TreeCore::upgrade(&self.core, "entities")?;
        let value = if tracked {
            core.read(&self.path)
        } else {
            core.read_untracked(&self.path)
        };
        read_collection(&value).ok_or_else(|| self.not_applied())
    }

    fn key_of(&self, record: &Value) -> Result<(Arc<str>, Value)> {
        self.config
            .id_of(record)
            .and_then(|id| id_key(&id).map(|key| (key, id)))
            .ok_or_else(|| TreeError::MissingEntityId {
                path: self.path.to_string(),
                field: self.config.describe(),
            })
    }

    fn key_for(&self, id: &Value) -> Result<Arc<str>> {
        id_key(id).ok_or_else(|| TreeError::MissingEntityId {
            path: self.path.to_string(),
            field: self.config.describe(),
        })
    }

    /// Commit a change to `byId` and `ids`. `f` reports whether it changed
    /// anything; an unchanged collection is not committed.
    fn mutate<R>(
        &self,
        action: &'static str,
        f: impl FnOnce(&mut ObjectMap, &mut Vec<Value>) -> Result<(R, bool)>,
    ) -> Result<R> {
        let core = TreeCore::upgrade(&self.core, action)?;
        if core.lookup(&self.path).is_none() {
            return Err(self.not_applied());
        }
        let label = format!("entities:{action}:{}", self.path);
        let mut outcome = None;

        core.commit(&label, &self.path, |current| {
            let Some((mut by_id, mut ids)) = read_collection(current) else {
                outcome = Some(Err(self.not_applied()));
                return current.clone();
            };
            match f(&mut by_id, &mut ids) {
                Ok((result, true)) => {
                    outcome = Some(Ok(result));
                    write_collection(by_id, ids)
                }
                Ok((result, false)) => {
                    outcome = Some(Ok(result));
                    current.clone()
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    current.clone()
                }
            }
        })?;

        outcome.unwrap_or_else(|| Err(self.not_applied()))
    }

    fn insert(by_id: &mut ObjectMap, ids: &mut Vec<Value>, key: Arc<str>, id: Value, record: Value) {
        if by_id.insert(key, record).is_none() {
            ids.push(id);
        }
    }

    /// Add a record. An existing record with the same id is replaced in
    /// place.
    pub fn add_one(&self, record: impl Into<Value>) -> Result<()> {
        let record = record.into();
        let (key, id) = self.key_of(&record)?;
        self.mutate("addOne", |by_id, ids| {
            Self::insert(by_id, ids, key, id, record);
            Ok(((), true))
        })
    }

    pub fn add_many<V: Into<Value>>(&self, records: impl IntoIterator<Item = V>) -> Result<()> {
        let keyed = self.keyed(records)?;
        self.mutate("addMany", |by_id, ids| {
            let changed = !keyed.is_empty();
            for (key, id, record) in keyed {
                Self::insert(by_id, ids, key, id, record);
            }
            Ok(((), changed))
        })
    }

    /// Append a new record, or merge into the existing one with the same id.
    ///
    /// The merge is shallow: fields absent from `record` keep their current
    /// values, and the record keeps its position.
    pub fn upsert_one(&self, record: impl Into<Value>) -> Result<()> {
        let record = record.into();
        let (key, id) = self.key_of(&record)?;
        self.mutate("upsertOne", |by_id, ids| {
            Self::upsert(by_id, ids, key, id, record);
            Ok(((), true))
        })
    }

    pub fn upsert_many<V: Into<Value>>(&self, records: impl IntoIterator<Item = V>) -> Result<()> {
        let keyed = self.keyed(records)?;
        self.mutate("upsertMany", |by_id, ids| {
            let changed = !keyed.is_empty();
            for (key, id, record) in keyed {
                Self::upsert(by_id, ids, key, id, record);
            }
            Ok(((), changed))
        })
    }

    fn upsert(by_id: &mut ObjectMap, ids: &mut Vec<Value>, key: Arc<str>, id: Value, record: Value) {
        match by_id.get_mut(&key) {
            Some(existing) => *existing = merge_shallow(existing, record),
            None => {
                by_id.insert(key, record);
                ids.push(id);
            }
        }
    }

    /// Replace every record.
    pub fn set_all<V: Into<Value>>(&self, records: impl IntoIterator<Item = V>) -> Result<()> {
        let keyed = self.keyed(records)?;
        self.mutate("setAll", |by_id, ids| {
            by_id.clear();
            ids.clear();
            for (key, id, record) in keyed {
                Self::insert(by_id, ids, key, id, record);
            }
            Ok(((), true))
        })
    }

    fn keyed<V: Into<Value>>(
        &self,
        records: impl IntoIterator<Item = V>,
    ) -> Result<Vec<(Arc<str>, Value, Value)>> {
        records
            .into_iter()
            .map(|record| {
                let record = record.into();
                let (key, id) = self.key_of(&record)?;
                Ok((key, id, record))
            })
            .collect()
    }

    /// Remove a record. Returns whether it existed.
    pub fn remove_one(&self, id: impl Into<Value>) -> Result<bool> {
        let key = self.key_for(&id.into())?;
        self.mutate("removeOne", |by_id, ids| {
            let removed = Self::remove(by_id, ids, &key);
            Ok((removed, removed))
        })
    }

    /// Remove several records. Returns how many existed.
    pub fn remove_many<V: Into<Value>>(&self, ids: impl IntoIterator<Item = V>) -> Result<usize> {
        let keys = ids
            .into_iter()
            .map(|id| self.key_for(&id.into()))
            .collect::<Result<Vec<_>>>()?;
        self.mutate("removeMany", |by_id, ids| {
            let removed = keys
                .iter()
                .filter(|key| Self::remove(by_id, ids, key))
                .count();
            Ok((removed, removed > 0))
        })
    }

    fn remove(by_id: &mut ObjectMap, ids: &mut Vec<Value>, key: &str) -> bool {
        if by_id.shift_remove(key).is_none() {
            return false;
        }
        ids.retain(|id| id_key(id).as_deref() != Some(key));
        true
    }

    /// Merge `changes` into the record with `id`.
    ///
    /// If the merge changes the record's id, the record is re-keyed and
    /// keeps its position. Re-keying onto an id held by another record
    /// fails with [`TreeError::EntityIdConflict`] and changes nothing.
    pub fn update_one(&self, id: impl Into<Value>, changes: impl Into<Value>) -> Result<()> {
        let key = self.key_for(&id.into())?;
        let changes = changes.into();
        self.mutate("updateOne", |by_id, ids| {
            let existing = by_id.get(&key).ok_or_else(|| TreeError::EntityNotFound {
                path: self.path.to_string(),
                id: key.to_string(),
            })?;
            let merged = merge_shallow(existing, changes);
            let (new_key, new_id) = self.key_of(&merged)?;

            if new_key == key {
                by_id.insert(key, merged);
            } else if by_id.contains_key(&new_key) {
                return Err(TreeError::EntityIdConflict {
                    path: self.path.to_string(),
                    id: new_key.to_string(),
                });
            } else {
                by_id.shift_remove(&key);
                by_id.insert(new_key, merged);
                if let Some(slot) = ids.iter_mut().find(|i| id_key(i).as_deref() == Some(&*key)) {
                    *slot = new_id;
                }
            }
            Ok(((), true))
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate("clear", |by_id, ids| {
            let changed = !ids.is_empty();
            by_id.clear();
            ids.clear();
            Ok(((), changed))
        })
    }

    /// Every record in `ids` order. Tracked.
    pub fn all(&self) -> Result<Vec<Value>> {
        let (by_id, ids) = self.read(true)?;
        Ok(ids
            .iter()
            .filter_map(|id| id_key(id).and_then(|key| by_id.get(&key).cloned()))
            .collect())
    }

    /// The ids, in order. Tracked.
    pub fn ids(&self) -> Result<Vec<Value>> {
        Ok(self.read(true)?.1)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.read(true)?.1.len())
    }

    pub fn contains(&self, id: impl Into<Value>) -> Result<bool> {
        let key = self.key_for(&id.into())?;
        Ok(self.read(true)?.0.contains_key(&key))
    }

    /// A handle on one record.
    pub fn by_id(&self, id: impl Into<Value>) -> Result<EntityRef> {
        let id = id.into();
        let key = self.key_for(&id)?;
        Ok(EntityRef {
            collection: self.clone(),
            key,
            id,
        })
    }
}

impl std::fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCollection")
            .field("path", &self.path.to_string())
            .field("id", &self.config.describe())
            .finish()
    }
}

/// Reactive handle on a single entity.
#[derive(Debug, Clone)]
pub struct EntityRef {
    collection: EntityCollection,
    key: Arc<str>,
    id: Value,
}

impl EntityRef {
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// The record, or `None` if it has been removed. Tracked.
    pub fn get(&self) -> Result<Option<Value>> {
        let (by_id, _) = self.collection.read(true)?;
        Ok(by_id.get(&self.key).cloned())
    }

    pub fn update(&self, changes: impl Into<Value>) -> Result<()> {
        self.collection.update_one(self.id.clone(), changes)
    }

    pub fn remove(&self) -> Result<bool> {
        self.collection.remove_one(self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_tree() -> SignalTree {
        SignalTree::new(Value::object([
            ("users", entity_map()),
            ("meta", Value::from(json!({"page": 1}))),
        ]))
        .unwrap()
        .with([entities()])
        .unwrap()
    }

    fn user(id: i64, name: &str) -> Value {
        Value::from(json!({"id": id, "name": name}))
    }

    fn names(users: &EntityCollection) -> Vec<String> {
        users
            .all()
            .unwrap()
            .iter()
            .map(|u| u["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn marker_is_inert_leaf_before_enhancement() {
        let tree = SignalTree::new(Value::object([("users", entity_map())])).unwrap();
        assert!(tree.at("users").unwrap().is_leaf());
        assert!(matches!(
            tree.entities("users"),
            Err(TreeError::EntitiesNotApplied { .. })
        ));
    }

    #[test]
    fn enhancer_materializes_markers() {
        let tree = users_tree();
        let state = tree.get().unwrap();
        assert_eq!(state["users"], Value::from(json!({"byId": {}, "ids": []})));
        assert_eq!(state["meta"]["page"], Value::from(1));
    }

    #[test]
    fn crud_keeps_ids_and_by_id_aligned() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();

        users.add_many([user(1, "ada"), user(2, "bob"), user(3, "cy")]).unwrap();
        users.remove_one(2).unwrap();
        users.upsert_one(json!({"id": 3, "role": "admin"})).unwrap();
        users.upsert_one(user(4, "dee")).unwrap();

        assert_eq!(names(&users), vec!["ada", "cy", "dee"]);
        assert_eq!(users.count().unwrap(), 3);
        assert_eq!(users.ids().unwrap(), vec![Value::from(1), Value::from(3), Value::from(4)]);
        assert_eq!(users.by_id(3).unwrap().get().unwrap().unwrap()["role"], Value::from("admin"));

        let raw = tree.get().unwrap();
        assert_eq!(raw["users"]["byId"].as_object().unwrap().len(), 3);
    }

    #[test]
    fn add_one_collision_is_last_write_wins() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        users.add_one(user(1, "first")).unwrap();
        users.add_one(user(2, "other")).unwrap();
        users.add_one(user(1, "second")).unwrap();

        assert_eq!(names(&users), vec!["second", "other"]);
        assert_eq!(users.count().unwrap(), 2);
    }

    #[test]
    fn upsert_many_merges_and_appends() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        users.add_one(user(1, "ada")).unwrap();

        users
            .upsert_many([json!({"id": 1, "role": "admin"}), json!({"id": 2, "name": "bob"})])
            .unwrap();

        assert_eq!(names(&users), vec!["ada", "bob"]);
        assert_eq!(users.by_id(1).unwrap().get().unwrap().unwrap()["role"], Value::from("admin"));

        let before = tree.get().unwrap();
        users.upsert_many(Vec::<Value>::new()).unwrap();
        assert!(tree.get().unwrap().ptr_eq(&before));
    }

    #[test]
    fn update_one_requires_existing_id() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        users.add_one(user(1, "ada")).unwrap();

        users.update_one(1, json!({"name": "ada l."})).unwrap();
        assert_eq!(names(&users), vec!["ada l."]);

        assert!(matches!(
            users.update_one(9, json!({"name": "x"})),
            Err(TreeError::EntityNotFound { ref id, .. }) if id == "9"
        ));
    }

    #[test]
    fn update_one_can_rekey() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        users.add_many([user(1, "a"), user(2, "b")]).unwrap();

        users.update_one(1, json!({"id": 10})).unwrap();
        assert_eq!(users.ids().unwrap(), vec![Value::from(10), Value::from(2)]);
        assert!(users.contains(10).unwrap());
        assert!(!users.contains(1).unwrap());
    }

    #[test]
    fn update_one_rejects_rekey_onto_existing_id() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        users.add_many([user(1, "a"), user(2, "b")]).unwrap();
        let before = tree.get().unwrap();

        let result = users.update_one(1, json!({"id": 2}));
        assert!(matches!(
            result,
            Err(TreeError::EntityIdConflict { ref id, .. }) if id == "2"
        ));

        assert!(tree.get().unwrap().ptr_eq(&before));
        assert_eq!(users.ids().unwrap(), vec![Value::from(1), Value::from(2)]);
        assert_eq!(names(&users), vec!["a", "b"]);
    }

    #[test]
    fn records_without_id_are_rejected() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        assert!(matches!(
            users.add_one(json!({"name": "anon"})),
            Err(TreeError::MissingEntityId { .. })
        ));
        assert_eq!(users.count().unwrap(), 0);
    }

    #[test]
    fn custom_selector() {
        let tree = SignalTree::new(Value::object([(
            "books",
            entity_map_with(EntityConfig::select_id(|book: &Value| book["isbn"].clone())),
        )]))
        .unwrap()
        .with([entities()])
        .unwrap();
        let books = tree.entities("books").unwrap();

        books.add_one(json!({"isbn": "978-0", "title": "T"})).unwrap();
        assert!(books.contains("978-0").unwrap());
    }

    #[test]
    fn custom_id_field() {
        let tree = SignalTree::new(Value::object([(
            "rows",
            entity_map_with(EntityConfig::id_field("key")),
        )]))
        .unwrap()
        .with([entities()])
        .unwrap();
        let rows = tree.entities("rows").unwrap();
        rows.set_all([json!({"key": "a"}), json!({"key": "b"})]).unwrap();
        assert_eq!(rows.count().unwrap(), 2);
        rows.clear().unwrap();
        assert_eq!(rows.count().unwrap(), 0);
    }

    #[test]
    fn remove_missing_does_not_notify() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        let version = tree.version();
        assert!(!users.remove_one(42).unwrap());
        assert_eq!(users.remove_many([7, 8]).unwrap(), 0);
        assert_eq!(tree.version(), version);
    }

    #[test]
    fn entity_ref_tracks_record() {
        let tree = users_tree();
        let users = tree.entities("users").unwrap();
        users.add_one(user(5, "eve")).unwrap();

        let eve = users.by_id(5).unwrap();
        eve.update(json!({"name": "eve!"})).unwrap();
        assert_eq!(eve.get().unwrap().unwrap()["name"], Value::from("eve!"));
        assert!(eve.remove().unwrap());
        assert_eq!(eve.get().unwrap(), None);
    }

    #[test]
    fn nested_markers_and_late_markers() {
        let tree = SignalTree::new(json!({"app": {}}))
            .unwrap()
            .with([entities()])
            .unwrap();
        assert!(tree.entities("app.todos").is_err());

        tree.node("app").unwrap().set(Value::object([("todos", entity_map())])).unwrap();
        let todos = tree.entities("app.todos").unwrap();
        todos.add_one(json!({"id": "t1"})).unwrap();
        assert_eq!(todos.count().unwrap(), 1);
    }

    #[test]
    fn reapplying_is_a_noop() {
        let tree = users_tree();
        tree.entities("users").unwrap().add_one(user(1, "a")).unwrap();
        let again = tree.with([entities()]).unwrap();
        assert_eq!(again.entities("users").unwrap().count().unwrap(), 1);
    }

    #[test]
    fn id_keys() {
        assert_eq!(id_key(&Value::from(3)).as_deref(), Some("3"));
        assert_eq!(id_key(&Value::from(1.5)).as_deref(), Some("1.5"));
        assert_eq!(id_key(&Value::from("x")).as_deref(), Some("x"));
        assert_eq!(id_key(&Value::BigInt(12)).as_deref(), Some("12"));
        assert_eq!(id_key(&Value::Null), None);
    }
}
