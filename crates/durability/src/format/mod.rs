//! Binary container format
//!
//! ```text
//! Header (24 bytes)
//! Body: entity_count × {
//!     type_id_len u16, type_id utf8, schema_version u32,
//!     payload_len u32, payload
//! }
//! Sections: { section_id u32, section_len u32, data }*
//! Footer: crc32 over everything above
//! ```
//!
//! All integers are little-endian. Unknown section ids are skipped on read.

pub mod header;
pub mod metadata;

pub use header::{
    section_ids, ContainerHeader, SectionHeader, CONTAINER_FOOTER_SIZE,
    CONTAINER_FORMAT_VERSION, CONTAINER_HEADER_SIZE, CONTAINER_MAGIC,
};
pub use metadata::ContainerMetadata;

/// File extension of save containers
pub const CONTAINER_EXTENSION: &str = "sfsav";

/// Suffix appended to the destination while a container is being written
pub const TEMP_SUFFIX: &str = ".tmp";
