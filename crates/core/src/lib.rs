//! Core types for Starfire persistence
//!
//! This crate defines the foundational types shared by every layer:
//! - StableId, EntityTypeId, SchemaVersion, EntityHandle: identities
//! - Value: field values held by live entities
//! - FieldValue / EntityRef: portable field values stored in containers
//! - FieldType: declared field types
//! - EntityRecord: one captured entity
//! - codec: conversion between Value and FieldValue
//! - Error: error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod limits;
pub mod path;
pub mod record;
pub mod timestamp;
pub mod types;
pub mod value;

pub use codec::{FieldCodec, NoReferences, ReferenceDecoder, ReferenceEncoder};
pub use error::{Error, Result};
pub use limits::{Limits, MAX_CAPTURE_DEPTH, MAX_NESTING_DEPTH};
pub use path::{FieldPath, PathSegment};
pub use record::EntityRecord;
pub use timestamp::Timestamp;
pub use types::{EntityHandle, EntityTypeId, SchemaVersion, StableId};
pub use value::{EntityRef, FieldType, FieldValue, Value};
