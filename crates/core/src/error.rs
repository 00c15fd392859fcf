//! Error types for the persistence engine
//!
//! This module defines the error taxonomy shared by every layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors fall in three groups:
//! - Registration: DuplicateSchema, InvalidSchema, RegistryFrozen
//! - Per-record: UnknownType, TypeMismatch, MigrationGap, FutureVersion,
//!   MigrationFailed, MissingEntity, SpawnFailed, DanglingReference
//! - Per-operation: CorruptContainer, UnsupportedFormat, OperationInProgress,
//!   Cancelled, Io

use crate::types::{EntityTypeId, SchemaVersion, StableId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for persistence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the persistence engine
#[derive(Debug, Error)]
pub enum Error {
    /// A type id was registered twice
    #[error("Schema already registered for type '{type_id}'")]
    DuplicateSchema {
        /// The offending type id
        type_id: EntityTypeId,
    },

    /// A type id has no registered schema
    #[error("Unknown entity type '{type_id}'")]
    UnknownType {
        /// The unknown type id
        type_id: EntityTypeId,
    },

    /// A schema failed validation at registration time
    #[error("Invalid schema for type '{type_id}': {reason}")]
    InvalidSchema {
        /// Type being registered
        type_id: EntityTypeId,
        /// What was wrong with it
        reason: String,
    },

    /// Registration attempted after the registry was frozen
    #[error("Schema registry is frozen; cannot register '{type_id}'")]
    RegistryFrozen {
        /// Type that arrived too late
        type_id: EntityTypeId,
    },

    /// A value's tag does not match the declared field type
    #[error("Type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Field path where the mismatch occurred
        path: String,
        /// Declared field type
        expected: String,
        /// Tag of the value actually present
        found: String,
    },

    /// Composite value nested deeper than the codec allows
    #[error("Value at '{path}' nested deeper than {limit} levels")]
    NestingTooDeep {
        /// Field path where the limit was hit
        path: String,
        /// The configured limit
        limit: usize,
    },

    /// A migration step required to upgrade a record is missing
    #[error("No migration step for type '{type_id}' from {from} (current {current})")]
    MigrationGap {
        /// Record type
        type_id: EntityTypeId,
        /// Version with no outgoing step
        from: SchemaVersion,
        /// Current registry version
        current: SchemaVersion,
    },

    /// Record was written by a newer schema than this process knows
    #[error("Record of type '{type_id}' stored at {stored}, newer than current {current}")]
    FutureVersion {
        /// Record type
        type_id: EntityTypeId,
        /// Version in the container
        stored: SchemaVersion,
        /// Current registry version
        current: SchemaVersion,
    },

    /// A migration step reported failure
    #[error("Migration of type '{type_id}' from {from} failed: {reason}")]
    MigrationFailed {
        /// Record type
        type_id: EntityTypeId,
        /// Source version of the failing step
        from: SchemaVersion,
        /// Message from the step
        reason: String,
    },

    /// A reference could not be resolved at the end of a restore pass
    #[error("Dangling reference at '{path}' on {owner}: target {target} never appeared")]
    DanglingReference {
        /// Entity owning the reference
        owner: StableId,
        /// Field path of the reference
        path: String,
        /// Id that never resolved
        target: StableId,
    },

    /// No pre-existing entity carries the id and creation is not allowed
    #[error("No existing entity of type '{type_id}' with id {id}")]
    MissingEntity {
        /// Record type
        type_id: EntityTypeId,
        /// Id searched for
        id: StableId,
    },

    /// The collection's factory refused to create an entity
    #[error("Failed to spawn entity of type '{type_id}': {reason}")]
    SpawnFailed {
        /// Requested type
        type_id: EntityTypeId,
        /// Reason reported by the collection
        reason: String,
    },

    /// Checksum, header or framing failure in a container
    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    /// Container format version not understood by this build
    #[error("Unsupported container format version {found} (supported up to {supported})")]
    UnsupportedFormat {
        /// Version in the file
        found: u16,
        /// Highest version this build reads
        supported: u16,
    },

    /// Another operation of the same kind is running on the same target
    #[error("A {operation} is already in progress for {}", .target.display())]
    OperationInProgress {
        /// Operation kind ("save" or "load")
        operation: &'static str,
        /// Container target
        target: PathBuf,
    },

    /// Operation stopped by its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Save slot name is empty or not a plain file name
    #[error("Invalid slot name: {0:?}")]
    InvalidSlotName(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand for a type mismatch error
    pub fn type_mismatch(
        path: impl ToString,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Error::TypeMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Whether this error concerns a single record rather than the whole operation
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            Error::UnknownType { .. }
                | Error::TypeMismatch { .. }
                | Error::NestingTooDeep { .. }
                | Error::MigrationGap { .. }
                | Error::FutureVersion { .. }
                | Error::MigrationFailed { .. }
                | Error::MissingEntity { .. }
                | Error::SpawnFailed { .. }
                | Error::DanglingReference { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_duplicate_schema() {
        let err = Error::DuplicateSchema {
            type_id: EntityTypeId::from("npc"),
        };
        assert!(err.to_string().contains("already registered"));
        assert!(err.to_string().contains("npc"));
    }

    #[test]
    fn test_error_display_type_mismatch() {
        let err = Error::type_mismatch("inventory[2]", "Int", "Float");
        let msg = err.to_string();
        assert!(msg.contains("inventory[2]"));
        assert!(msg.contains("expected Int"));
        assert!(msg.contains("found Float"));
    }

    #[test]
    fn test_error_display_migration_gap() {
        let err = Error::MigrationGap {
            type_id: EntityTypeId::from("door"),
            from: SchemaVersion::new(1),
            current: SchemaVersion::new(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("from v1"));
        assert!(msg.contains("current v3"));
    }

    #[test]
    fn test_error_display_operation_in_progress() {
        let err = Error::OperationInProgress {
            operation: "save",
            target: PathBuf::from("/saves/slot_1.sfsav"),
        };
        let msg = err.to_string();
        assert!(msg.contains("save"));
        assert!(msg.contains("slot_1.sfsav"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_record_level_classification() {
        assert!(Error::type_mismatch("a", "Int", "Bool").is_record_level());
        assert!(!Error::CorruptContainer("crc".into()).is_record_level());
        assert!(!Error::Cancelled.is_record_level());
    }
}
