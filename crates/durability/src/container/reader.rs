//! Container reader
//!
//! Loading never exposes partially parsed data: the whole file is read,
//! its length and CRC are verified, and only then are the header, records
//! and sections parsed.

use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use super::Container;
use crate::codec::{codec_for_tag, StorageCodec};
use crate::error::{ContainerError, ContainerResult};
use crate::format::{
    section_ids, ContainerHeader, ContainerMetadata, SectionHeader, CONTAINER_FOOTER_SIZE,
    CONTAINER_FORMAT_VERSION, CONTAINER_HEADER_SIZE, CONTAINER_MAGIC,
};
use starfire_core::{EntityRecord, EntityTypeId, FieldValue, SchemaVersion, StableId, Timestamp};

/// Container reader
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerReader;

impl ContainerReader {
    /// Create a reader
    pub fn new() -> Self {
        ContainerReader
    }

    /// Load and fully decode a container file
    pub fn load(&self, path: &Path) -> ContainerResult<Container> {
        let bytes = fs::read(path)?;
        let container = self.decode(&bytes)?;
        debug!(
            target: "starfire::container",
            path = %path.display(),
            entities = container.len(),
            "Container loaded"
        );
        Ok(container)
    }

    /// Decode a container from its on-disk bytes
    pub fn decode(&self, bytes: &[u8]) -> ContainerResult<Container> {
        let (header, content) = verify(bytes)?;
        let codec = codec_for_tag(header.codec_tag)?;

        let mut cursor = Cursor::new(content, CONTAINER_HEADER_SIZE);
        let mut records = Vec::with_capacity(header.entity_count.min(4096) as usize);
        for _ in 0..header.entity_count {
            let frame = cursor.record_frame()?;
            records.push(decode_record(frame, codec.as_ref())?);
        }

        let sections = parse_sections(&mut cursor)?;
        Ok(Container {
            format_version: header.format_version,
            created_at: Timestamp::from_micros(header.created_at),
            records,
            metadata: sections.metadata,
            destroyed: sections.destroyed,
        })
    }

    /// Read header and metadata without decoding any record payload
    pub fn read_summary(&self, path: &Path) -> ContainerResult<ContainerSummary> {
        let bytes = fs::read(path)?;
        self.summarize(&bytes)
    }

    /// Summarize a container from its on-disk bytes
    pub fn summarize(&self, bytes: &[u8]) -> ContainerResult<ContainerSummary> {
        let (header, content) = verify(bytes)?;
        let mut cursor = Cursor::new(content, CONTAINER_HEADER_SIZE);
        for _ in 0..header.entity_count {
            cursor.record_frame()?;
        }
        let sections = parse_sections(&mut cursor)?;
        Ok(ContainerSummary {
            header,
            created_at: Timestamp::from_micros(header.created_at),
            metadata: sections.metadata,
            destroyed_count: sections.destroyed.len(),
            file_size: bytes.len(),
            crc: footer_crc(bytes),
        })
    }
}

/// Header and metadata of a container, without its records
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    /// Parsed header
    pub header: ContainerHeader,
    /// Creation time
    pub created_at: Timestamp,
    /// Metadata section (default if absent)
    pub metadata: ContainerMetadata,
    /// Number of destroyed ids recorded
    pub destroyed_count: usize,
    /// Total file size in bytes
    pub file_size: usize,
    /// CRC32 footer value
    pub crc: u32,
}

impl ContainerSummary {
    /// Number of records in the container
    pub fn entity_count(&self) -> u32 {
        self.header.entity_count
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Check size, CRC, magic and version, in that order
///
/// Returns the header and the content without its footer.
fn verify(bytes: &[u8]) -> ContainerResult<(ContainerHeader, &[u8])> {
    if bytes.len() < CONTAINER_HEADER_SIZE + CONTAINER_FOOTER_SIZE {
        return Err(ContainerError::TooSmall { size: bytes.len() });
    }

    let content_len = bytes.len() - CONTAINER_FOOTER_SIZE;
    let content = &bytes[..content_len];
    let stored = footer_crc(bytes);
    let computed = crc32fast::hash(content);
    if stored != computed {
        return Err(ContainerError::CrcMismatch { stored, computed });
    }

    let header = ContainerHeader::from_bytes(content).ok_or(ContainerError::TooSmall {
        size: bytes.len(),
    })?;
    if header.magic != CONTAINER_MAGIC {
        return Err(ContainerError::InvalidMagic {
            expected: CONTAINER_MAGIC,
            actual: header.magic,
        });
    }
    if header.format_version != CONTAINER_FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion {
            found: header.format_version,
            supported: CONTAINER_FORMAT_VERSION,
        });
    }
    Ok((header, content))
}

fn footer_crc(bytes: &[u8]) -> u32 {
    LittleEndian::read_u32(&bytes[bytes.len() - CONTAINER_FOOTER_SIZE..])
}

// =============================================================================
// Parsing
// =============================================================================

/// Bounds-checked forward reader over the verified content
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

/// One record frame with its payload still encoded
struct RecordFrame<'a> {
    type_id: EntityTypeId,
    version: SchemaVersion,
    payload: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Cursor { data, pos }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, context: &'static str) -> ContainerResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(ContainerError::Truncated {
                context,
                offset: self.pos,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self, context: &'static str) -> ContainerResult<u16> {
        Ok(LittleEndian::read_u16(self.take(2, context)?))
    }

    fn read_u32(&mut self, context: &'static str) -> ContainerResult<u32> {
        Ok(LittleEndian::read_u32(self.take(4, context)?))
    }

    fn record_frame(&mut self) -> ContainerResult<RecordFrame<'a>> {
        let type_len = self.read_u16("type id length")? as usize;
        let type_bytes = self.take(type_len, "type id")?;
        let type_id = std::str::from_utf8(type_bytes)
            .map_err(|e| ContainerError::InvalidTypeId(e.to_string()))?;
        let version = self.read_u32("schema version")?;
        let payload_len = self.read_u32("payload length")? as usize;
        let payload = self.take(payload_len, "record payload")?;
        Ok(RecordFrame {
            type_id: EntityTypeId::new(type_id),
            version: SchemaVersion::new(version),
            payload,
        })
    }
}

fn decode_record(frame: RecordFrame<'_>, codec: &dyn StorageCodec) -> ContainerResult<EntityRecord> {
    let raw = codec.decode(frame.payload)?;
    let (id, fields): (StableId, Vec<(String, FieldValue)>) = rmp_serde::from_slice(&raw)
        .map_err(|e| {
            ContainerError::Payload(format!("record of type '{}': {}", frame.type_id, e))
        })?;
    Ok(EntityRecord {
        id,
        type_id: frame.type_id,
        version: frame.version,
        fields,
    })
}

#[derive(Default)]
struct Sections {
    metadata: ContainerMetadata,
    destroyed: Vec<StableId>,
}

fn parse_sections(cursor: &mut Cursor<'_>) -> ContainerResult<Sections> {
    let mut sections = Sections::default();
    while cursor.remaining() > 0 {
        if cursor.remaining() < SectionHeader::SIZE {
            return Err(ContainerError::TrailingBytes {
                extra: cursor.remaining(),
            });
        }
        let header_bytes = cursor.take(SectionHeader::SIZE, "section header")?;
        let header = SectionHeader::from_bytes(header_bytes).ok_or(ContainerError::Truncated {
            context: "section header",
            offset: cursor.pos,
        })?;
        let data = cursor.take(header.data_len as usize, "section data")?;

        match header.section_id {
            section_ids::METADATA => {
                sections.metadata = rmp_serde::from_slice(data)
                    .map_err(|e| ContainerError::Payload(format!("metadata section: {}", e)))?;
            }
            section_ids::DESTROYED => {
                sections.destroyed = rmp_serde::from_slice(data)
                    .map_err(|e| ContainerError::Payload(format!("destroyed section: {}", e)))?;
            }
            unknown => {
                warn!(
                    target: "starfire::container",
                    section_id = unknown,
                    len = header.data_len,
                    "Skipping unknown container section"
                );
            }
        }
    }
    Ok(sections)
}
