//! Value types for persisted entity fields
//!
//! This module defines three closely related types:
//! - FieldType: the declared type of a field in a schema layout
//! - Value: a field value as held by a live entity
//! - FieldValue: the portable, tagged representation stored in containers
//!
//! `Value` and `FieldValue` have the same shape. They differ only in how
//! references are expressed: a live value points at an `EntityHandle` in the
//! running collection, a portable value names the target by `StableId`.
//!
//! ## Type Rules
//!
//! - No implicit coercions: `Int(1)` is never accepted for a `Float` field
//! - `Bytes` are not `String`
//! - Map keys are kept in sorted order so encoded output is deterministic
//! - Composites never contain cycles; entity cycles are expressed as references

use crate::types::{EntityHandle, EntityTypeId, StableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// FieldType
// =============================================================================

/// Declared type of a persisted field
///
/// The scalar set is fixed: Bool, Int, Float, String, Bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 string
    String,
    /// Raw bytes
    Bytes,
    /// Ordered sequence of elements of one type
    List(Box<FieldType>),
    /// Mapping from name to elements of one type
    Map(Box<FieldType>),
    /// The inner type or Null
    Optional(Box<FieldType>),
    /// Reference to another persisted entity
    ///
    /// `Some(type)` restricts the target type; `None` accepts any type.
    /// References are always nullable.
    Reference(Option<EntityTypeId>),
}

impl FieldType {
    /// List of `inner`
    pub fn list(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    /// Map of `inner`
    pub fn map(inner: FieldType) -> Self {
        FieldType::Map(Box::new(inner))
    }

    /// Optional `inner`
    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    /// Reference to an entity of the given type
    pub fn reference(target: impl Into<EntityTypeId>) -> Self {
        FieldType::Reference(Some(target.into()))
    }

    /// Reference to an entity of any type
    pub fn any_reference() -> Self {
        FieldType::Reference(None)
    }

    /// Whether values of this type may contain references
    pub fn contains_references(&self) -> bool {
        match self {
            FieldType::Reference(_) => true,
            FieldType::List(inner) | FieldType::Map(inner) | FieldType::Optional(inner) => {
                inner.contains_references()
            }
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => f.write_str("Bool"),
            FieldType::Int => f.write_str("Int"),
            FieldType::Float => f.write_str("Float"),
            FieldType::String => f.write_str("String"),
            FieldType::Bytes => f.write_str("Bytes"),
            FieldType::List(inner) => write!(f, "List<{}>", inner),
            FieldType::Map(inner) => write!(f, "Map<{}>", inner),
            FieldType::Optional(inner) => write!(f, "Optional<{}>", inner),
            FieldType::Reference(Some(target)) => write!(f, "Reference<{}>", target),
            FieldType::Reference(None) => f.write_str("Reference<*>"),
        }
    }
}

// =============================================================================
// Value (live)
// =============================================================================

/// Field value as held by a live entity
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list
    List(Vec<Value>),
    /// Name to value mapping
    Map(BTreeMap<String, Value>),
    /// Reference to a live entity, `None` when unset or not yet resolved
    Entity(Option<EntityHandle>),
}

impl Value {
    /// Get the tag name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Entity(_) => "Reference",
        }
    }

    /// Get as entity handle if this is a set reference
    pub fn as_entity(&self) -> Option<EntityHandle> {
        match self {
            Value::Entity(handle) => *handle,
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collect every referenced handle, depth first
    pub fn referenced_handles(&self, out: &mut Vec<EntityHandle>) {
        match self {
            Value::Entity(Some(handle)) => out.push(*handle),
            Value::List(items) => items.iter().for_each(|v| v.referenced_handles(out)),
            Value::Map(entries) => entries.values().for_each(|v| v.referenced_handles(out)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<EntityHandle> for Value {
    fn from(handle: EntityHandle) -> Self {
        Value::Entity(Some(handle))
    }
}

// =============================================================================
// FieldValue (portable)
// =============================================================================

/// Reference to a persisted entity inside a portable value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Type of the target entity at capture time
    pub target_type: EntityTypeId,
    /// Identity of the target
    pub id: StableId,
    /// Target is known to live outside the container it was written to
    #[serde(default)]
    pub external: bool,
}

impl EntityRef {
    /// Reference expected to resolve within the same container
    pub fn new(target_type: EntityTypeId, id: StableId) -> Self {
        EntityRef {
            target_type,
            id,
            external: false,
        }
    }

    /// Reference explicitly marked as pointing outside the container
    pub fn external(target_type: EntityTypeId, id: StableId) -> Self {
        EntityRef {
            target_type,
            id,
            external: true,
        }
    }
}

/// Portable, tagged field value as stored in a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Absent value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list
    List(Vec<FieldValue>),
    /// Name to value mapping, sorted by key
    Map(BTreeMap<String, FieldValue>),
    /// Reference to another persisted entity
    Reference(EntityRef),
}

impl FieldValue {
    /// Get the tag name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "Null",
            FieldValue::Bool(_) => "Bool",
            FieldValue::Int(_) => "Int",
            FieldValue::Float(_) => "Float",
            FieldValue::String(_) => "String",
            FieldValue::Bytes(_) => "Bytes",
            FieldValue::List(_) => "List",
            FieldValue::Map(_) => "Map",
            FieldValue::Reference(_) => "Reference",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the reference if this is a Reference value
    pub fn as_reference(&self) -> Option<&EntityRef> {
        match self {
            FieldValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Visit every reference contained in this value, depth first
    pub fn for_each_reference<F: FnMut(&EntityRef)>(&self, f: &mut F) {
        match self {
            FieldValue::Reference(r) => f(r),
            FieldValue::List(items) => items.iter().for_each(|v| v.for_each_reference(f)),
            FieldValue::Map(entries) => entries.values().for_each(|v| v.for_each_reference(f)),
            _ => {}
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<EntityRef> for FieldValue {
    fn from(r: EntityRef) -> Self {
        FieldValue::Reference(r)
    }
}
