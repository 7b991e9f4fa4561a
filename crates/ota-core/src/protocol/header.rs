//! Transfer framing structures.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid magic: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed transfer header (16 bytes).
///
/// Declares the total image size before any payload arrives so the engine
/// can pick and open a target partition up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub version: u16,
    pub flags: u16,
    /// Total firmware image size across all payload segments.
    pub total_size: u32,
}

impl ImageHeader {
    pub const SIZE: usize = IMAGE_HEADER_SIZE;

    pub fn new(total_size: u32, flags: u16) -> Self {
        Self {
            version: FORMAT_VERSION,
            flags,
            total_size,
        }
    }

    pub fn has_trailer(&self) -> bool {
        self.flags & FLAG_SHA256 != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u32::<LittleEndian>(IMAGE_MAGIC).unwrap();
        buf.write_u16::<LittleEndian>(self.version).unwrap();
        buf.write_u16::<LittleEndian>(self.flags).unwrap();
        buf.write_u32::<LittleEndian>(self.total_size).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap(); // reserved
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != IMAGE_MAGIC {
            return Err(HeaderError::InvalidMagic {
                expected: IMAGE_MAGIC,
                actual: magic,
            });
        }
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let flags = cursor.read_u16::<LittleEndian>()?;
        let total_size = cursor.read_u32::<LittleEndian>()?;
        Ok(Self {
            version,
            flags,
            total_size,
        })
    }
}

/// Tagged, length-prefixed segment header (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub tag: u32,
    pub length: u32,
}

impl SegmentHeader {
    pub const SIZE: usize = SEGMENT_HEADER_SIZE;

    pub fn new(tag: u32, length: u32) -> Self {
        Self { tag, length }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u32::<LittleEndian>(self.tag).unwrap();
        buf.write_u32::<LittleEndian>(self.length).unwrap();
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            tag: cursor.read_u32::<LittleEndian>()?,
            length: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Render the tag as ASCII for logs.
    pub fn tag_ascii(&self) -> String {
        self.tag
            .to_le_bytes()
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() {
                    b as char
                } else {
                    '.'
                }
            })
            .collect()
    }
}
