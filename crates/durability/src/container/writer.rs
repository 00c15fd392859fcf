//! Crash-safe container writer
//!
//! Uses the write-fsync-rename pattern:
//! 1. Encode the whole container in memory
//! 2. Write to `<dest>.tmp` and fsync it
//! 3. Atomic rename over `<dest>`
//! 4. fsync the parent directory
//!
//! The destination is always either the previous complete container or
//! the new one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info};

use super::Container;
use crate::codec::{IdentityCodec, StorageCodec};
use crate::error::{ContainerError, ContainerResult};
use crate::format::{section_ids, ContainerHeader, SectionHeader, TEMP_SUFFIX};
use starfire_core::limits::MAX_TYPE_ID_BYTES;
use starfire_core::{EntityRecord, Timestamp};

/// Container writer with crash-safe semantics
pub struct ContainerWriter {
    codec: Box<dyn StorageCodec>,
    sync_directory: bool,
}

impl ContainerWriter {
    /// Create a writer applying `codec` to record payloads
    pub fn new(codec: Box<dyn StorageCodec>) -> Self {
        ContainerWriter {
            codec,
            sync_directory: true,
        }
    }

    /// Whether to fsync the parent directory after the rename
    pub fn with_sync_directory(mut self, sync: bool) -> Self {
        self.sync_directory = sync;
        self
    }

    /// Codec used for payloads
    pub fn codec(&self) -> &dyn StorageCodec {
        self.codec.as_ref()
    }

    /// Encode a container to its on-disk bytes, footer included
    pub fn encode(&self, container: &Container) -> ContainerResult<Vec<u8>> {
        let entity_count =
            u32::try_from(container.records.len()).map_err(|_| ContainerError::TooLarge {
                what: "entity count",
                len: container.records.len(),
            })?;
        let header = ContainerHeader::new(
            self.codec.codec_tag(),
            entity_count,
            container.created_at.as_micros(),
        );

        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(&header.to_bytes());

        for record in &container.records {
            self.encode_record(&mut buf, record)?;
        }

        let metadata = rmp_serde::to_vec_named(&container.metadata)
            .map_err(|e| ContainerError::Payload(e.to_string()))?;
        write_section(&mut buf, section_ids::METADATA, &metadata)?;

        if !container.destroyed.is_empty() {
            let destroyed = rmp_serde::to_vec(&container.destroyed)
                .map_err(|e| ContainerError::Payload(e.to_string()))?;
            write_section(&mut buf, section_ids::DESTROYED, &destroyed)?;
        }

        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        Ok(buf)
    }

    fn encode_record(&self, buf: &mut Vec<u8>, record: &EntityRecord) -> ContainerResult<()> {
        let type_id = record.type_id.as_str().as_bytes();
        if type_id.len() > MAX_TYPE_ID_BYTES {
            return Err(ContainerError::InvalidTypeId(format!(
                "{} bytes exceeds the {} byte limit",
                type_id.len(),
                MAX_TYPE_ID_BYTES
            )));
        }

        let raw = rmp_serde::to_vec(&(&record.id, &record.fields))
            .map_err(|e| ContainerError::Payload(e.to_string()))?;
        let payload = self.codec.encode(&raw)?;
        let payload_len = u32::try_from(payload.len()).map_err(|_| ContainerError::TooLarge {
            what: "record payload",
            len: payload.len(),
        })?;

        buf.write_u16::<LittleEndian>(type_id.len() as u16)?;
        buf.extend_from_slice(type_id);
        buf.write_u32::<LittleEndian>(record.version.get())?;
        buf.write_u32::<LittleEndian>(payload_len)?;
        buf.extend_from_slice(&payload);
        Ok(())
    }

    /// Write a container to `dest` atomically
    ///
    /// On failure the previous file at `dest`, if any, is left untouched and
    /// the temporary file is removed.
    pub fn write(&self, container: &Container, dest: &Path) -> ContainerResult<SaveInfo> {
        let bytes = self.encode(container)?;
        let crc = crc_of(&bytes);

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = temp_path_for(dest);
        if let Err(e) = self.write_atomic(&bytes, &temp_path, dest) {
            if temp_path.exists() {
                if let Err(cleanup) = fs::remove_file(&temp_path) {
                    debug!(target: "starfire::container", error = %cleanup, "Temp file cleanup failed");
                }
            }
            return Err(e);
        }

        info!(
            target: "starfire::container",
            path = %dest.display(),
            entities = container.len(),
            bytes = bytes.len(),
            codec = self.codec.codec_id(),
            "Container written"
        );

        Ok(SaveInfo {
            path: dest.to_path_buf(),
            entity_count: container.len(),
            bytes_written: bytes.len() as u64,
            crc,
            created_at: container.created_at,
        })
    }

    fn write_atomic(&self, bytes: &[u8], temp_path: &Path, dest: &Path) -> ContainerResult<()> {
        // Step 1: write and fsync the temporary file
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        // Step 2: atomic rename
        fs::rename(temp_path, dest)?;

        // Step 3: fsync parent directory
        if self.sync_directory {
            if let Some(parent) = dest.parent() {
                let dir = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
                File::open(dir)?.sync_all()?;
            }
        }
        Ok(())
    }
}

impl Default for ContainerWriter {
    fn default() -> Self {
        ContainerWriter::new(Box::new(IdentityCodec))
    }
}

/// Temporary path used while writing `dest`
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

fn write_section(buf: &mut Vec<u8>, section_id: u32, data: &[u8]) -> ContainerResult<()> {
    let len = u32::try_from(data.len()).map_err(|_| ContainerError::TooLarge {
        what: section_ids::name(section_id),
        len: data.len(),
    })?;
    buf.extend_from_slice(&SectionHeader::new(section_id, len).to_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

fn crc_of(bytes: &[u8]) -> u32 {
    let mut footer = [0u8; 4];
    footer.copy_from_slice(&bytes[bytes.len() - 4..]);
    u32::from_le_bytes(footer)
}

/// Information about a written container
#[derive(Debug, Clone)]
pub struct SaveInfo {
    /// Destination path
    pub path: PathBuf,
    /// Number of records written
    pub entity_count: usize,
    /// Total file size
    pub bytes_written: u64,
    /// CRC32 footer value
    pub crc: u32,
    /// Container creation time
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZstdCodec;
    use crate::format::{CONTAINER_FORMAT_VERSION, CONTAINER_HEADER_SIZE};
    use starfire_core::{FieldValue, SchemaVersion, StableId};

    fn sample() -> Container {
        Container::new(vec![EntityRecord::new(
            StableId::new(),
            "chest".into(),
            SchemaVersion::new(3),
        )
        .with_field("gold", FieldValue::Int(250))])
    }

    #[test]
    fn test_encode_layout() {
        let container = sample();
        let bytes = ContainerWriter::default().encode(&container).unwrap();

        assert_eq!(&bytes[0..4], b"SFSV");
        assert_eq!(
            u16::from_le_bytes([bytes[4], bytes[5]]),
            CONTAINER_FORMAT_VERSION
        );
        assert_eq!(bytes[6], 0, "identity codec tag");
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1);

        // First record frame
        let type_len = u16::from_le_bytes([bytes[24], bytes[25]]) as usize;
        assert_eq!(&bytes[26..26 + type_len], b"chest");
        let version_at = 26 + type_len;
        assert_eq!(
            u32::from_le_bytes(bytes[version_at..version_at + 4].try_into().unwrap()),
            3
        );
        assert!(bytes.len() > CONTAINER_HEADER_SIZE + 4);
    }

    #[test]
    fn test_footer_crc() {
        let bytes = ContainerWriter::default().encode(&sample()).unwrap();
        let stored = crc_of(&bytes);
        assert_eq!(stored, crc32fast::hash(&bytes[..bytes.len() - 4]));
    }

    #[test]
    fn test_zstd_tag_in_header() {
        let writer = ContainerWriter::new(Box::new(ZstdCodec::default()));
        let bytes = writer.encode(&sample()).unwrap();
        assert_eq!(bytes[6], 1);
    }

    #[test]
    fn test_write_creates_file_without_temp() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("slot.sfsav");
        let info = ContainerWriter::default().write(&sample(), &dest).unwrap();

        assert!(dest.exists());
        assert!(!temp_path_for(&dest).exists());
        assert_eq!(info.entity_count, 1);
        assert_eq!(info.bytes_written, fs::metadata(&dest).unwrap().len());
    }

    #[test]
    fn test_write_replaces_previous() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("slot.sfsav");
        let writer = ContainerWriter::default();
        writer.write(&sample(), &dest).unwrap();
        let second = writer.write(&Container::new(Vec::new()), &dest).unwrap();
        assert_eq!(second.entity_count, 0);
        assert_eq!(fs::metadata(&dest).unwrap().len(), second.bytes_written);
    }

    #[test]
    fn test_encode_failure_leaves_previous_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("slot.sfsav");
        let writer = ContainerWriter::default();
        writer.write(&sample(), &dest).unwrap();
        let before = fs::read(&dest).unwrap();

        let oversized = "x".repeat(MAX_TYPE_ID_BYTES + 1);
        let bad = Container::new(vec![EntityRecord::new(
            StableId::new(),
            oversized.into(),
            SchemaVersion::new(1),
        )]);
        assert!(matches!(
            writer.write(&bad, &dest),
            Err(ContainerError::InvalidTypeId(_))
        ));
        assert_eq!(fs::read(&dest).unwrap(), before);
        assert!(!temp_path_for(&dest).exists());
    }

    #[test]
    fn test_temp_path_for() {
        let path = temp_path_for(Path::new("/saves/slot_1.sfsav"));
        assert_eq!(path, PathBuf::from("/saves/slot_1.sfsav.tmp"));
    }
}
