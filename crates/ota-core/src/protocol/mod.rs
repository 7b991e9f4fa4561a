//! Protocol module - transfer wire-format definitions.

pub mod constants;
pub mod header;

pub use constants::*;
pub use header::{HeaderError, ImageHeader, SegmentHeader};
