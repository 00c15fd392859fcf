//! Fixed-size container header and section framing
//!
//! # Header Layout (24 bytes, little-endian)
//!
//! | Offset | Size | Field          |
//! |--------|------|----------------|
//! | 0      | 4    | magic "SFSV"   |
//! | 4      | 2    | format_version |
//! | 6      | 1    | codec_tag      |
//! | 7      | 1    | flags          |
//! | 8      | 4    | entity_count   |
//! | 12     | 8    | created_at µs  |
//! | 20     | 4    | reserved       |

use byteorder::{ByteOrder, LittleEndian};

/// Magic bytes at the start of every container
pub const CONTAINER_MAGIC: [u8; 4] = *b"SFSV";

/// Current container format version
///
/// Independent of entity schema versions.
pub const CONTAINER_FORMAT_VERSION: u16 = 1;

/// Size of the fixed header
pub const CONTAINER_HEADER_SIZE: usize = 24;

/// Size of the CRC32 footer
pub const CONTAINER_FOOTER_SIZE: usize = 4;

/// Container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Magic bytes
    pub magic: [u8; 4],
    /// Container format version
    pub format_version: u16,
    /// Tag of the codec applied to record payloads
    pub codec_tag: u8,
    /// Reserved flags, written as 0
    pub flags: u8,
    /// Number of records in the body
    pub entity_count: u32,
    /// Creation time, microseconds since Unix epoch
    pub created_at: u64,
    /// Reserved, written as 0
    pub reserved: u32,
}

impl ContainerHeader {
    /// Header for a container written by this build
    pub fn new(codec_tag: u8, entity_count: u32, created_at: u64) -> Self {
        ContainerHeader {
            magic: CONTAINER_MAGIC,
            format_version: CONTAINER_FORMAT_VERSION,
            codec_tag,
            flags: 0,
            entity_count,
            created_at,
            reserved: 0,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; CONTAINER_HEADER_SIZE] {
        let mut bytes = [0u8; CONTAINER_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u16(&mut bytes[4..6], self.format_version);
        bytes[6] = self.codec_tag;
        bytes[7] = self.flags;
        LittleEndian::write_u32(&mut bytes[8..12], self.entity_count);
        LittleEndian::write_u64(&mut bytes[12..20], self.created_at);
        LittleEndian::write_u32(&mut bytes[20..24], self.reserved);
        bytes
    }

    /// Parse from bytes
    ///
    /// Returns None if fewer than `CONTAINER_HEADER_SIZE` bytes are given.
    /// Magic and version are not checked here.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < CONTAINER_HEADER_SIZE {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Some(ContainerHeader {
            magic,
            format_version: LittleEndian::read_u16(&bytes[4..6]),
            codec_tag: bytes[6],
            flags: bytes[7],
            entity_count: LittleEndian::read_u32(&bytes[8..12]),
            created_at: LittleEndian::read_u64(&bytes[12..20]),
            reserved: LittleEndian::read_u32(&bytes[20..24]),
        })
    }
}

/// Trailing section identifiers
pub mod section_ids {
    /// Container metadata (display name, build version, features)
    pub const METADATA: u32 = 1;
    /// Stable ids of entities destroyed at save time
    pub const DESTROYED: u32 = 2;

    /// Human-readable section name
    pub fn name(id: u32) -> &'static str {
        match id {
            METADATA => "metadata",
            DESTROYED => "destroyed",
            _ => "unknown",
        }
    }
}

/// Header of one trailing section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section identifier
    pub section_id: u32,
    /// Length of the section body
    pub data_len: u32,
}

impl SectionHeader {
    /// Serialized size
    pub const SIZE: usize = 8;

    /// Create a section header
    pub fn new(section_id: u32, data_len: u32) -> Self {
        SectionHeader {
            section_id,
            data_len,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.section_id);
        LittleEndian::write_u32(&mut bytes[4..8], self.data_len);
        bytes
    }

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(SectionHeader {
            section_id: LittleEndian::read_u32(&bytes[0..4]),
            data_len: LittleEndian::read_u32(&bytes[4..8]),
        })
    }
}
