//! Identity types for persisted entities
//!
//! This module defines the identifiers shared by every layer:
//! - StableId: process-independent identity of one persisted entity
//! - EntityTypeId: name of a registered entity type
//! - SchemaVersion: per-type schema version
//! - EntityHandle: transient handle into a live entity collection

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a persisted entity
///
/// A StableId is a wrapper around a UUID v4. It is assigned once, survives
/// save/load cycles and reordering, and is never reused for another entity.
/// It carries no relation to in-memory addresses or collection indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StableId(Uuid);

impl StableId {
    /// Create a new random StableId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a StableId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse a StableId from a string representation
    ///
    /// Accepts standard UUID format (with or without hyphens).
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this StableId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for StableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a registered entity type
///
/// Type ids are plain names (`"npc"`, `"inventory.item"`). They are written
/// into every container record, so renaming a type is a format change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTypeId(String);

impl EntityTypeId {
    /// Create a type id from any string-like value
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the type name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityTypeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EntityTypeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Schema version of an entity type
///
/// Monotonically increasing per type. The registry holds the current value;
/// every stored record carries the version it was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(u32);

impl SchemaVersion {
    /// The first version of any type
    pub const INITIAL: SchemaVersion = SchemaVersion(0);

    /// Create a version from its raw number
    #[inline]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Raw version number
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The version immediately after this one, if representable
    #[inline]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl From<u32> for SchemaVersion {
    fn from(version: u32) -> Self {
        Self(version)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Transient handle into a live entity collection
///
/// Handles are only meaningful inside the process and collection that issued
/// them. They are never written to a container; references are translated
/// to StableIds on capture and back to handles on restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(u64);

impl EntityHandle {
    /// Creates a handle from a raw collection index
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_id_unique() {
        let a = StableId::new();
        let b = StableId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_stable_id_string_round_trip() {
        let id = StableId::new();
        let parsed = StableId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(StableId::from_string("not-a-uuid").is_none());
    }

    #[test]
    fn test_stable_id_bytes() {
        let bytes = [7u8; 16];
        let id = StableId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }

    #[test]
    fn test_type_id_display() {
        let ty = EntityTypeId::from("npc");
        assert_eq!(ty.as_str(), "npc");
        assert_eq!(ty.to_string(), "npc");
    }

    #[test]
    fn test_schema_version_ordering() {
        let v0 = SchemaVersion::INITIAL;
        let v1 = v0.next().unwrap();
        assert!(v0 < v1);
        assert_eq!(v1.get(), 1);
        assert_eq!(v1.to_string(), "v1");
        assert!(SchemaVersion::new(u32::MAX).next().is_none());
    }

    #[test]
    fn test_schema_version_serializes_as_number() {
        let json = serde_json::to_string(&SchemaVersion::new(3)).unwrap();
        assert_eq!(json, "3");
    }

    #[test]
    fn test_entity_handle_display() {
        assert_eq!(EntityHandle::new(12).to_string(), "#12");
    }
}
