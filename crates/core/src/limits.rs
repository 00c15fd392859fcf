//! Limits shared by the codec, the capturer and the container format
//!
//! The constants are the defaults. A `Limits` value can be narrowed for
//! tests that need to exercise limit enforcement without building huge
//! values.

/// Deepest composite nesting the field codec accepts
pub const MAX_NESTING_DEPTH: usize = 64;

/// Deepest recursive capture before referenced entities are queued instead
pub const MAX_CAPTURE_DEPTH: usize = 100;

/// Longest type id the container format can store (u16 length prefix)
pub const MAX_TYPE_ID_BYTES: usize = u16::MAX as usize;

/// Largest single record payload in a container (u32 length prefix)
pub const MAX_PAYLOAD_BYTES: usize = u32::MAX as usize;

/// Limits enforced while encoding and capturing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum composite nesting depth (default: 64)
    pub max_nesting_depth: usize,

    /// Maximum recursive capture depth (default: 100)
    pub max_capture_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_nesting_depth: MAX_NESTING_DEPTH,
            max_capture_depth: MAX_CAPTURE_DEPTH,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_nesting_depth: 4,
            max_capture_depth: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_nesting_depth, MAX_NESTING_DEPTH);
        assert_eq!(limits.max_capture_depth, 100);
    }

    #[test]
    fn test_small_limits_are_smaller() {
        let small = Limits::with_small_limits();
        let default = Limits::default();
        assert!(small.max_nesting_depth < default.max_nesting_depth);
        assert!(small.max_capture_depth < default.max_capture_depth);
    }
}
