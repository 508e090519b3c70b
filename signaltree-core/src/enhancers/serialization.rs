//! Serialization enhancer.
//!
//! # How Serialization Works
//!
//! 1. The state is encoded into JSON with every non-JSON value tagged by a
//!    single reserved key:
//!
//!    | Value                 | Encoding                                   |
//!    |-----------------------|--------------------------------------------|
//!    | undefined             | `{"$undefined": true}`                     |
//!    | NaN / ±Infinity       | `{"$nan": true}` / `{"$inf": 1 \| -1}`     |
//!    | bigint                | `{"$bigint": "123"}`                       |
//!    | Date                  | `{"$date": "<rfc3339>"}`                   |
//!    | RegExp                | `{"$regexp": {"source", "flags"}}`         |
//!    | Map / Set             | `{"$map": [[k, v], ...]}` / `{"$set": [..]}`|
//!    | Symbol                | `{"$symbol": "description"}`               |
//!    | function              | `{"$function": "name"}`                    |
//!
//!    A plain object with any key starting with `$` is wrapped in
//!    `{"$escaped": {...}}` so it cannot be mistaken for a tag.
//!
//! 2. The encoded state is wrapped in the envelope
//!    `{"data": ..., "metadata": {"timestamp", "version"}}`.
//!
//! 3. Decoding reverses the tags. Functions and `$circular` markers cannot
//!    be restored; they decode to `undefined` with a warning.
//!
//! A failed decode leaves the tree untouched.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Map as JsonMap, Number, Value as Json};

use crate::error::{Result, TreeError};
use crate::tree::SignalTree;
use crate::value::{ObjectMap, Value};

use super::{enhancer, Enhancer, EnhancerMetadata, CORE_CAPABILITY};

pub const CAPABILITY: &str = "serialization";

const TAG_UNDEFINED: &str = "$undefined";
const TAG_NAN: &str = "$nan";
const TAG_INF: &str = "$inf";
const TAG_BIGINT: &str = "$bigint";
const TAG_DATE: &str = "$date";
const TAG_REGEXP: &str = "$regexp";
const TAG_MAP: &str = "$map";
const TAG_SET: &str = "$set";
const TAG_SYMBOL: &str = "$symbol";
const TAG_FUNCTION: &str = "$function";
const TAG_CIRCULAR: &str = "$circular";
const TAG_ESCAPED: &str = "$escaped";

// ---- Encoding ----

fn tagged(tag: &str, payload: Json) -> Json {
    let mut map = JsonMap::with_capacity(1);
    map.insert(tag.to_string(), payload);
    Json::Object(map)
}

fn encode_number(n: f64) -> Json {
    if n.is_nan() {
        return tagged(TAG_NAN, Json::Bool(true));
    }
    if n.is_infinite() {
        return tagged(TAG_INF, json!(if n > 0.0 { 1 } else { -1 }));
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return Json::from(n as i64);
    }
    Number::from_f64(n).map_or(Json::Null, Json::Number)
}

/// Encode a value into tagged JSON.
pub fn encode(value: &Value) -> Json {
    match value {
        Value::Undefined => tagged(TAG_UNDEFINED, Json::Bool(true)),
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => encode_number(*n),
        Value::BigInt(n) => tagged(TAG_BIGINT, Json::String(n.to_string())),
        Value::String(s) => Json::String(s.to_string()),
        Value::Symbol(sym) => tagged(TAG_SYMBOL, Json::String(sym.description().to_string())),
        Value::Date(d) => tagged(TAG_DATE, Json::String(d.to_rfc3339())),
        Value::RegExp { source, flags } => tagged(
            TAG_REGEXP,
            json!({ "source": source.as_ref(), "flags": flags.as_ref() }),
        ),
        Value::Function(f) => tagged(TAG_FUNCTION, Json::String(f.name().to_string())),
        Value::Map(entries) => tagged(
            TAG_MAP,
            Json::Array(
                entries
                    .iter()
                    .map(|(k, v)| Json::Array(vec![encode(k), encode(v)]))
                    .collect(),
            ),
        ),
        Value::Set(items) => tagged(TAG_SET, Json::Array(items.iter().map(encode).collect())),
        Value::Array(items) => Json::Array(items.iter().map(encode).collect()),
        Value::Object(map) => {
            let encoded: JsonMap<String, Json> = map
                .iter()
                .map(|(k, v)| (k.to_string(), encode(v)))
                .collect();
            if map.keys().any(|k| k.starts_with('$')) {
                tagged(TAG_ESCAPED, Json::Object(encoded))
            } else {
                Json::Object(encoded)
            }
        }
    }
}

// ---- Decoding ----

fn malformed(tag: &str, detail: impl fmt::Display) -> TreeError {
    TreeError::Deserialize(format!("malformed {tag} tag: {detail}"))
}

/// Decode tagged JSON back into a value.
pub fn decode(json: &Json) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN))),
        Json::String(s) => Ok(Value::from(s.as_str())),
        Json::Array(items) => Ok(Value::array(
            items.iter().map(decode).collect::<Result<Vec<_>>>()?,
        )),
        Json::Object(map) => match single_tag(map) {
            Some((tag, payload)) => decode_tag(tag, payload),
            None => decode_object(map),
        },
    }
}

fn single_tag(map: &JsonMap<String, Json>) -> Option<(&str, &Json)> {
    if map.len() != 1 {
        return None;
    }
    map.iter()
        .next()
        .filter(|(k, _)| k.starts_with('$'))
        .map(|(k, v)| (k.as_str(), v))
}

fn decode_object(map: &JsonMap<String, Json>) -> Result<Value> {
    let mut object = ObjectMap::with_capacity(map.len());
    for (key, value) in map {
        object.insert(Arc::from(key.as_str()), decode(value)?);
    }
    Ok(Value::from(object))
}

fn decode_tag(tag: &str, payload: &Json) -> Result<Value> {
    match tag {
        TAG_UNDEFINED => Ok(Value::Undefined),
        TAG_NAN => Ok(Value::Number(f64::NAN)),
        TAG_INF => match payload.as_f64() {
            Some(sign) if sign < 0.0 => Ok(Value::Number(f64::NEG_INFINITY)),
            Some(_) => Ok(Value::Number(f64::INFINITY)),
            None => Err(malformed(tag, payload)),
        },
        TAG_BIGINT => payload
            .as_str()
            .and_then(|s| s.parse::<i128>().ok())
            .map(Value::BigInt)
            .ok_or_else(|| malformed(tag, payload)),
        TAG_DATE => {
            let text = payload.as_str().ok_or_else(|| malformed(tag, payload))?;
            let date = DateTime::parse_from_rfc3339(text).map_err(|e| malformed(tag, e))?;
            Ok(Value::Date(date.with_timezone(&Utc)))
        }
        TAG_REGEXP => {
            let source = payload.get("source").and_then(Json::as_str);
            let flags = payload.get("flags").and_then(Json::as_str).unwrap_or_default();
            source
                .map(|source| Value::regexp(source, flags))
                .ok_or_else(|| malformed(tag, payload))
        }
        TAG_MAP => {
            let entries = payload.as_array().ok_or_else(|| malformed(tag, payload))?;
            let decoded = entries
                .iter()
                .map(|entry| match entry.as_array().map(Vec::as_slice) {
                    Some([k, v]) => Ok((decode(k)?, decode(v)?)),
                    _ => Err(malformed(tag, entry)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::map(decoded))
        }
        TAG_SET => {
            let items = payload.as_array().ok_or_else(|| malformed(tag, payload))?;
            Ok(Value::set(items.iter().map(decode).collect::<Result<Vec<_>>>()?))
        }
        TAG_SYMBOL => Ok(Value::symbol(payload.as_str().unwrap_or_default())),
        TAG_FUNCTION => {
            tracing::warn!(name = %payload, "function values cannot be restored; using undefined");
            Ok(Value::Undefined)
        }
        TAG_CIRCULAR => {
            tracing::warn!(reference = %payload, "circular reference cannot be restored; using undefined");
            Ok(Value::Undefined)
        }
        TAG_ESCAPED => match payload {
            Json::Object(map) => decode_object(map),
            other => Err(malformed(tag, other)),
        },
        _ => {
            let mut map = JsonMap::with_capacity(1);
            map.insert(tag.to_string(), payload.clone());
            decode_object(&map)
        }
    }
}

// ---- Storage ----

/// Key-value persistence used by [`SerializationExt::save`] and
/// [`SerializationExt::load`].
pub trait StorageAdapter: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: String) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl StorageAdapter for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.get(key).map(|item| item.value().clone()))
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.items.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SerializationConfig {
    pub storage: Arc<dyn StorageAdapter>,
    /// Write the `metadata` block into serialized output.
    pub include_metadata: bool,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            include_metadata: true,
        }
    }
}

impl SerializationConfig {
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = storage;
        self
    }

    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}

impl fmt::Debug for SerializationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializationConfig")
            .field("include_metadata", &self.include_metadata)
            .finish_non_exhaustive()
    }
}

// ---- Enhancer ----

/// Serialization with in-memory storage. Applying it again is a no-op.
pub fn serialization() -> Box<dyn Enhancer> {
    serialization_with(SerializationConfig::default())
}

pub fn serialization_with(config: SerializationConfig) -> Box<dyn Enhancer> {
    enhancer(
        EnhancerMetadata::new(CAPABILITY).depends_on([CORE_CAPABILITY]),
        move |tree| {
            if tree.has_capability(CAPABILITY) {
                return Ok(tree);
            }
            Ok(tree.with_extension(Arc::new(config.clone())))
        },
    )
}

pub trait SerializationExt {
    /// The state as an envelope JSON document.
    fn serialize_value(&self) -> Result<Json>;

    /// The state as envelope JSON text.
    fn serialize(&self) -> Result<String>;

    /// Replace the state from envelope JSON text.
    fn deserialize(&self, text: &str) -> Result<()>;

    /// The envelope encoded as MessagePack.
    fn snapshot_binary(&self) -> Result<Vec<u8>>;

    /// Replace the state from a MessagePack envelope.
    fn restore_binary(&self, bytes: &[u8]) -> Result<()>;

    /// Serialize into the configured storage under `key`.
    fn save(&self, key: &str) -> Result<()>;

    /// Restore from storage. Returns `false` when nothing is stored under
    /// `key`.
    fn load(&self, key: &str) -> Result<bool>;
}

fn config(tree: &SignalTree, operation: &'static str) -> Result<Arc<SerializationConfig>> {
    tree.require_extension::<SerializationConfig>(CAPABILITY, operation)
}

fn restore(tree: &SignalTree, envelope: &Json) -> Result<()> {
    let data = envelope
        .get("data")
        .ok_or_else(|| TreeError::Deserialize("missing \"data\" field".to_string()))?;
    let state = decode(data)?;
    tracing::debug!(tree = %tree.name(), "restoring serialized state");
    tree.set(state)
}

impl SerializationExt for SignalTree {
    fn serialize_value(&self) -> Result<Json> {
        let config = config(self, "serialize")?;
        let data = encode(&self.get_untracked()?);
        if !config.include_metadata {
            return Ok(json!({ "data": data }));
        }
        Ok(json!({
            "data": data,
            "metadata": {
                "timestamp": Utc::now().to_rfc3339(),
                "version": self.version(),
            }
        }))
    }

    fn serialize(&self) -> Result<String> {
        let envelope = self.serialize_value()?;
        serde_json::to_string(&envelope).map_err(|e| TreeError::Serialize(e.to_string()))
    }

    fn deserialize(&self, text: &str) -> Result<()> {
        config(self, "deserialize")?;
        let envelope: Json = serde_json::from_str(text)?;
        restore(self, &envelope)
    }

    fn snapshot_binary(&self) -> Result<Vec<u8>> {
        let envelope = self.serialize_value()?;
        Ok(rmp_serde::to_vec_named(&envelope)?)
    }

    fn restore_binary(&self, bytes: &[u8]) -> Result<()> {
        config(self, "restore_binary")?;
        let envelope: Json = rmp_serde::from_slice(bytes)?;
        restore(self, &envelope)
    }

    fn save(&self, key: &str) -> Result<()> {
        let config = config(self, "save")?;
        let text = self.serialize()?;
        config.storage.set_item(key, text)
    }

    fn load(&self, key: &str) -> Result<bool> {
        let config = config(self, "load")?;
        match config.storage.get_item(key)? {
            Some(text) => self.deserialize(&text).map(|()| true),
            None => Ok(false),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
