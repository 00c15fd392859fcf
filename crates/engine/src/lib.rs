//! Persistence engine for Starfire
//!
//! This crate orchestrates the lower layers:
//! - Schema registry: per-type field layouts, versions and migration chains
//! - Stable-id table: process-independent entity identity
//! - Capture: live entities to records
//! - Migration: old records to the current schema
//! - Restore: records onto live entities, with deferred reference fix-ups
//! - Orchestrator: whole-collection save/load with atomic I/O, operation
//!   guards and background tasks
//!
//! The engine is the only component that knows about live entities. The
//! container format lives in `starfire-durability`, values and errors in
//! `starfire-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod capture;
pub mod config;
pub mod entity;
pub mod guard;
pub mod id_table;
pub mod migration;
pub mod persistence;
pub mod registry;
pub mod restore;

pub use background::BackgroundTask;
pub use capture::{capture_store, Capturer};
pub use config::{ConfigError, CreationPolicy, LoadMode, PersistenceConfig};
pub use entity::{DynamicEntity, EntityArena, EntityStore, Persistent, StoreId};
pub use guard::{CancellationToken, OperationGuard, OperationGuards, OperationKind};
pub use id_table::{NotYetRegistered, StableIdTable};
pub use migration::{migrate, MigrationTrace};
pub use persistence::Persistence;
pub use registry::{
    global_registry, register_schema, FieldDescriptor, MigrationFn, MigrationStep,
    SchemaRegistry, SchemaRegistryBuilder, TypeSchema,
};
pub use restore::{
    restore_records, DanglingRef, RecordFailure, RestoreOptions, RestoreOutcome, RestoreReport,
    RestoredEntity,
};
