//! Storage layer module.

pub mod file;
pub mod mem;
pub mod traits;

pub use file::FileFlash;
pub use mem::MemFlash;
pub use traits::{FlashDevice, FlashError};
