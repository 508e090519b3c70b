//! The one authoritative answer to "what kind of value is this?".
//!
//! Accessor construction and shape comparison branch on [`classify`], so the
//! rule that only plain objects get child accessors lives in one place. The
//! serializer still matches on [`Value`] variants, since it needs each
//! variant's payload.

use super::Value;

/// Built-ins that are stored whole and never walked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueKind {
    Date,
    RegExp,
    Map,
    Set,
    Function,
    Symbol,
    BigInt,
}

/// Closed classification of a state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A plain object: the only kind with child accessors.
    Plain,
    /// An array. Arrays are atomic leaves.
    Array,
    Opaque(OpaqueKind),
    /// undefined, null, booleans, numbers and strings.
    Primitive,
}

impl ValueKind {
    /// Whether an accessor for this kind is a leaf node.
    pub fn is_leaf(self) -> bool {
        !matches!(self, ValueKind::Plain)
    }

    pub fn is_opaque(self) -> bool {
        matches!(self, ValueKind::Opaque(_))
    }
}

/// Classify a value.
pub fn classify(value: &Value) -> ValueKind {
    match value {
        Value::Object(_) => ValueKind::Plain,
        Value::Array(_) => ValueKind::Array,
        Value::Date(_) => ValueKind::Opaque(OpaqueKind::Date),
        Value::RegExp { .. } => ValueKind::Opaque(OpaqueKind::RegExp),
        Value::Map(_) => ValueKind::Opaque(OpaqueKind::Map),
        Value::Set(_) => ValueKind::Opaque(OpaqueKind::Set),
        Value::Function(_) => ValueKind::Opaque(OpaqueKind::Function),
        Value::Symbol(_) => ValueKind::Opaque(OpaqueKind::Symbol),
        Value::BigInt(_) => ValueKind::Opaque(OpaqueKind::BigInt),
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            ValueKind::Primitive
        }
    }
}
