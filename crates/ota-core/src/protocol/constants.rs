//! Wire-format constants for the chunked firmware transfer.
//!
//! A transfer is: fixed image header, one or more tagged segments, then an
//! optional digest trailer. All multi-byte fields are little-endian.

/// Image header magic: "FWUP".
pub const IMAGE_MAGIC: u32 = 0x50555746;

/// Only format version understood by this engine.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed image header length: magic, version, flags, total size, reserved.
pub const IMAGE_HEADER_SIZE: usize = 16;

/// Segment header length: tag + body length.
pub const SEGMENT_HEADER_SIZE: usize = 8;

/// SHA-256 trailer length.
pub const DIGEST_SIZE: usize = 32;

// ============================================================================
// Header flags
// ============================================================================

/// Transfer ends with a SHA-256 digest trailer.
pub const FLAG_SHA256: u16 = 0x0001;

/// Segment bodies are encrypted and need the decrypt transform.
pub const FLAG_ENCRYPTED: u16 = 0x0002;

// ============================================================================
// Segment tags
// ============================================================================

/// Firmware payload segment: "DATA".
pub const SEG_DATA: u32 = 0x41544144;

/// End-of-segments marker: "END$".
pub const SEG_END: u32 = 0x24444E45;
