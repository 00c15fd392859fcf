//! Pass-through codec.

use super::traits::{CodecError, StorageCodec};
use super::IDENTITY_TAG;

/// Codec that leaves payloads untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl StorageCodec for IdentityCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn codec_id(&self) -> &str {
        "identity"
    }

    fn codec_tag(&self) -> u8 {
        IDENTITY_TAG
    }
}
