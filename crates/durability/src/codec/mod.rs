//! Storage codecs applied to record payloads.
//!
//! - `IdentityCodec` (tag 0): bytes pass through unchanged
//! - `ZstdCodec` (tag 1): zstd compression

mod identity;
mod traits;
mod zstd_codec;

pub use identity::IdentityCodec;
pub use traits::{CodecError, StorageCodec};
pub use zstd_codec::ZstdCodec;

/// Header tag of the identity codec
pub const IDENTITY_TAG: u8 = 0;

/// Header tag of the zstd codec
pub const ZSTD_TAG: u8 = 1;

/// Look up a codec by its configuration identifier.
pub fn get_codec(codec_id: &str) -> Result<Box<dyn StorageCodec>, CodecError> {
    match codec_id {
        "identity" => Ok(Box::new(IdentityCodec)),
        "zstd" => Ok(Box::new(ZstdCodec::default())),
        other => Err(CodecError::UnknownCodec(other.to_string())),
    }
}

/// Look up a codec by the tag stored in a container header.
pub fn codec_for_tag(tag: u8) -> Result<Box<dyn StorageCodec>, CodecError> {
    match tag {
        IDENTITY_TAG => Ok(Box::new(IdentityCodec)),
        ZSTD_TAG => Ok(Box::new(ZstdCodec::default())),
        other => Err(CodecError::UnknownCodecTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_codec() {
        assert_eq!(get_codec("identity").unwrap().codec_tag(), IDENTITY_TAG);
        assert_eq!(get_codec("zstd").unwrap().codec_tag(), ZSTD_TAG);
        assert!(matches!(
            get_codec("rot13"),
            Err(CodecError::UnknownCodec(_))
        ));
    }

    #[test]
    fn test_codec_for_tag() {
        assert_eq!(codec_for_tag(0).unwrap().codec_id(), "identity");
        assert_eq!(codec_for_tag(1).unwrap().codec_id(), "zstd");
        assert_eq!(codec_for_tag(7).err(), Some(CodecError::UnknownCodecTag(7)));
    }
}
