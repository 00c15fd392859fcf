//! Storage codec trait definitions.

/// Storage codec trait.
///
/// Every record payload passes through the codec on its way to and from
/// a container. The codec tag is written into the container header so the
/// reader can pick the matching codec without being told.
///
/// # Thread Safety
///
/// Codecs must be `Send + Sync` so writers and readers can be moved to
/// background workers.
pub trait StorageCodec: Send + Sync {
    /// Encode bytes for storage.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes from storage.
    ///
    /// Reverses the encode operation. Returns an error if the data
    /// cannot be decoded (e.g. truncated compressed frame).
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Human-readable codec identifier, used in configuration.
    fn codec_id(&self) -> &str;

    /// One-byte tag stored in the container header.
    fn codec_tag(&self) -> u8;
}

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Encoding failed.
    #[error("Encode error (codec={codec_id}): {detail}")]
    EncodeError {
        /// Human-readable error description
        detail: String,
        /// Codec ID that attempted the encode
        codec_id: String,
    },

    /// Decoding failed.
    ///
    /// Carries the codec identity and data length so callers can
    /// distinguish a wrong-codec error from data corruption.
    #[error("Decode error (codec={codec_id}, data_len={data_len}): {detail}")]
    DecodeError {
        /// Human-readable error description
        detail: String,
        /// Codec ID that attempted the decode
        codec_id: String,
        /// Length of the data that failed to decode
        data_len: usize,
    },

    /// Unknown codec identifier.
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),

    /// Unknown codec tag in a container header.
    #[error("Unknown codec tag: {0}")]
    UnknownCodecTag(u8),
}

impl CodecError {
    /// Create a decode error with full diagnostic context.
    pub fn decode(detail: impl Into<String>, codec_id: impl Into<String>, data_len: usize) -> Self {
        CodecError::DecodeError {
            detail: detail.into(),
            codec_id: codec_id.into(),
            data_len,
        }
    }

    /// Create an encode error.
    pub fn encode(detail: impl Into<String>, codec_id: impl Into<String>) -> Self {
        CodecError::EncodeError {
            detail: detail.into(),
            codec_id: codec_id.into(),
        }
    }
}
