//! Raw flash device abstraction.
//!
//! Defines the `FlashDevice` trait for byte-addressable persistent storage,
//! allowing different implementations (in-memory, file-backed, MMIO).
//! Erase granularity stays behind this seam; callers above it only deal in
//! byte offsets.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Access out of bounds: offset 0x{offset:X} + {len} exceeds capacity 0x{capacity:X}")]
    OutOfBounds { offset: u32, len: u32, capacity: u32 },

    #[error("Erase not aligned to block size {block}: offset 0x{offset:X} len {len}")]
    Unaligned { offset: u32, len: u32, block: u32 },

    #[error("Device fault: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract byte-addressable flash medium.
///
/// Writes may program fewer bytes than requested when the medium throttles;
/// the returned count is authoritative and callers loop. Erases must cover
/// whole blocks.
pub trait FlashDevice {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program bytes at `offset`; returns the number actually written.
    fn write(&self, offset: u32, data: &[u8]) -> Result<usize, FlashError>;

    /// Erase `len` bytes at `offset`; both must be block-aligned.
    fn erase(&self, offset: u32, len: u32) -> Result<(), FlashError>;

    /// Smallest erasable unit in bytes.
    fn erase_block_size(&self) -> u32;

    /// Total device size in bytes.
    fn capacity(&self) -> u32;
}
