//! Starfire - entity persistence and save-data versioning
//!
//! Starfire captures a live collection of entities into a durable,
//! versioned container and restores it later, resolving cross-entity
//! references and migrating records written by older schema versions.
//!
//! # Quick Start
//!
//! ```ignore
//! use starfire::{
//!     DynamicEntity, EntityArena, FieldType, Persistence, PersistenceConfig,
//!     RestoreOptions, SchemaRegistry, TypeSchema,
//! };
//!
//! let mut builder = SchemaRegistry::builder();
//! builder.register(TypeSchema::new("door", 1).with_field("open", FieldType::Bool))?;
//! let persistence = Persistence::new(builder.freeze(), PersistenceConfig::default())?;
//!
//! let mut world = EntityArena::new();
//! world.insert(DynamicEntity::new("door").with("open", true));
//! persistence.save(&world, Path::new("saves/slot1.sfsav"))?;
//!
//! let mut restored = EntityArena::new();
//! persistence.load(Path::new("saves/slot1.sfsav"), &mut restored, &RestoreOptions::strict())?;
//! ```
//!
//! # Architecture
//!
//! - `starfire-core`: identifiers, values, records, the field codec and errors
//! - `starfire-durability`: storage codecs, the container format and save slots
//! - `starfire-engine`: registry, capture, migration, restore and the orchestrator
//!
//! This crate re-exports the public surface of all three.

pub use starfire_core::{
    codec, EntityHandle, EntityRecord, EntityRef, EntityTypeId, Error, FieldCodec, FieldPath,
    FieldType, FieldValue, Limits, PathSegment, Result, SchemaVersion, StableId, Timestamp, Value,
    MAX_CAPTURE_DEPTH, MAX_NESTING_DEPTH,
};
pub use starfire_durability::{
    Container, ContainerMetadata, ContainerReader, ContainerSummary, ContainerWriter, SaveInfo,
    SlotInfo, SlotStatus, SlotStore,
};
pub use starfire_engine::*;
