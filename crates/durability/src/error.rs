//! Container-level errors
//!
//! Failures while framing, writing, reading or listing containers. The
//! engine converts these into `starfire_core::Error` at its boundary.

use crate::codec::CodecError;
use starfire_core::Error;
use std::io;

/// Result alias for durability operations
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors raised by the container format and the slot store
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// File is too small to hold a header and a checksum
    #[error("Container too small: {size} bytes")]
    TooSmall {
        /// Actual size
        size: usize,
    },

    /// Stored checksum does not match the content
    #[error("CRC mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    CrcMismatch {
        /// CRC in the footer
        stored: u32,
        /// CRC of the bytes before the footer
        computed: u32,
    },

    /// Magic bytes are not "SFSV"
    #[error("Invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Expected magic bytes
        expected: [u8; 4],
        /// Actual magic bytes
        actual: [u8; 4],
    },

    /// Format version not readable by this build
    #[error("Unsupported container format version {found} (supported {supported})")]
    UnsupportedVersion {
        /// Version in the header
        found: u16,
        /// Version this build reads
        supported: u16,
    },

    /// Framing ran past the end of the data
    #[error("Truncated {context} at offset {offset}")]
    Truncated {
        /// What was being read
        context: &'static str,
        /// Byte offset where reading stopped
        offset: usize,
    },

    /// Bytes left over after the last section
    #[error("{extra} unexpected trailing bytes before footer")]
    TrailingBytes {
        /// Number of extra bytes
        extra: usize,
    },

    /// A type id is not valid UTF-8 or too long to frame
    #[error("Invalid type id: {0}")]
    InvalidTypeId(String),

    /// A record payload or section body could not be (de)serialized
    #[error("Payload error: {0}")]
    Payload(String),

    /// A length does not fit its on-disk field
    #[error("{what} too large: {len} bytes")]
    TooLarge {
        /// What overflowed
        what: &'static str,
        /// Actual length
        len: usize,
    },

    /// Save slot name rejected
    #[error("Invalid slot name: {0:?}")]
    InvalidSlotName(String),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ContainerError> for Error {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::UnsupportedVersion { found, supported } => {
                Error::UnsupportedFormat { found, supported }
            }
            ContainerError::Io(e) => Error::Io(e),
            ContainerError::InvalidSlotName(name) => Error::InvalidSlotName(name),
            ContainerError::Codec(CodecError::EncodeError { .. }) | ContainerError::TooLarge { .. } => {
                Error::Serialization(err.to_string())
            }
            other => Error::CorruptContainer(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_mismatch_becomes_corrupt_container() {
        let err: Error = ContainerError::CrcMismatch {
            stored: 1,
            computed: 2,
        }
        .into();
        assert!(matches!(err, Error::CorruptContainer(msg) if msg.contains("CRC")));
    }

    #[test]
    fn test_version_becomes_unsupported_format() {
        let err: Error = ContainerError::UnsupportedVersion {
            found: 9,
            supported: 1,
        }
        .into();
        assert!(matches!(
            err,
            Error::UnsupportedFormat {
                found: 9,
                supported: 1
            }
        ));
    }

    #[test]
    fn test_io_and_slot_errors_keep_their_kind() {
        let err: Error = ContainerError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).into();
        assert!(matches!(err, Error::Io(_)));

        let err: Error = ContainerError::InvalidSlotName("../x".into()).into();
        assert!(matches!(err, Error::InvalidSlotName(_)));
    }
}
