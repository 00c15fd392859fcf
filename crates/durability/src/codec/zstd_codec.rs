//! zstd compression codec.

use super::traits::{CodecError, StorageCodec};
use super::ZSTD_TAG;

/// Default zstd compression level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Codec compressing each payload as one zstd frame.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    /// Create a codec with an explicit compression level.
    pub fn new(level: i32) -> Self {
        ZstdCodec { level }
    }

    /// Compression level used for encoding.
    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        ZstdCodec::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl StorageCodec for ZstdCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::stream::encode_all(data, self.level)
            .map_err(|e| CodecError::encode(e.to_string(), self.codec_id()))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::stream::decode_all(data)
            .map_err(|e| CodecError::decode(e.to_string(), self.codec_id(), data.len()))
    }

    fn codec_id(&self) -> &str {
        "zstd"
    }

    fn codec_tag(&self) -> u8 {
        ZSTD_TAG
    }
}
