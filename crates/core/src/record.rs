//! Captured entity records
//!
//! An `EntityRecord` is the unit stored in a container: one entity's identity,
//! type, the schema version it was written with, and its fields in declared
//! order. Records written into a container are never mutated in place;
//! migrations consume a record and return a new one.

use crate::types::{EntityTypeId, SchemaVersion, StableId};
use crate::value::{EntityRef, FieldValue};
use serde::{Deserialize, Serialize};

/// Snapshot of one entity's persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Identity of the captured entity
    pub id: StableId,
    /// Registered type of the entity
    pub type_id: EntityTypeId,
    /// Schema version the fields conform to
    pub version: SchemaVersion,
    /// Field values in layout order
    pub fields: Vec<(String, FieldValue)>,
}

impl EntityRecord {
    /// Create an empty record
    pub fn new(id: StableId, type_id: EntityTypeId, version: SchemaVersion) -> Self {
        EntityRecord {
            id,
            type_id,
            version,
            fields: Vec::new(),
        }
    }

    /// Builder-style field append
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether the record carries a field
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    /// Set a field, replacing an existing value in place or appending
    ///
    /// Returns the previous value if the field existed.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Remove a field, keeping the order of the others
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let pos = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Rename a field in place
    ///
    /// Returns false if `from` is absent.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|(n, _)| n == from) {
            Some((name, _)) => {
                *name = to.into();
                true
            }
            None => false,
        }
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All references held by this record, in field order
    pub fn references(&self) -> Vec<(String, EntityRef)> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            value.for_each_reference(&mut |r| out.push((name.clone(), r.clone())));
        }
        out
    }
}
