//! Durability layer for Starfire
//!
//! This crate handles everything that touches disk:
//!
//! - Storage codecs applied to record payloads (identity, zstd)
//! - The binary container format (header, records, sections, CRC footer)
//! - Crash-safe container writes (temp file, fsync, rename, directory fsync)
//! - Checksum-first container reads and header-only summaries
//! - Save slots: named containers in one directory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec; // Payload codecs (identity, zstd)
pub mod container; // In-memory container, writer and reader
pub mod error; // ContainerError and conversion into core errors
pub mod format; // Binary on-disk layout
pub mod slots; // Named save slots

// Codec
pub use codec::{codec_for_tag, get_codec, CodecError, IdentityCodec, StorageCodec, ZstdCodec};

// Container
pub use container::{
    temp_path_for, Container, ContainerReader, ContainerSummary, ContainerWriter, SaveInfo,
};

// Errors
pub use error::{ContainerError, ContainerResult};

// Format
pub use format::{
    section_ids, ContainerHeader, ContainerMetadata, SectionHeader, CONTAINER_EXTENSION,
    CONTAINER_FORMAT_VERSION, CONTAINER_HEADER_SIZE, CONTAINER_MAGIC,
};

// Slots
pub use slots::{validate_slot_name, SlotInfo, SlotStatus, SlotStore};
