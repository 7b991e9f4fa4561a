//! File-backed flash device.
//!
//! Treats a regular file as the flash medium so the engine can run against
//! a disk image on a host. The file must already have the full device size.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{FlashDevice, FlashError};

const ERASED: u8 = 0xFF;

pub struct FileFlash {
    file: Mutex<File>,
    capacity: u32,
    block_size: u32,
}

impl FileFlash {
    /// Open an existing flash image read-write.
    pub fn open<P: AsRef<Path>>(path: P, block_size: u32) -> Result<Self, FlashError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len() as u32;
        Ok(Self {
            file: Mutex::new(file),
            capacity,
            block_size,
        })
    }

    /// Create a blank (fully erased) flash image of `capacity` bytes.
    pub fn create<P: AsRef<Path>>(
        path: P,
        capacity: u32,
        block_size: u32,
    ) -> Result<Self, FlashError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&vec![ERASED; capacity as usize])?;
        file.flush()?;
        Ok(Self {
            file: Mutex::new(file),
            capacity,
            block_size,
        })
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<(), FlashError> {
        if offset as usize + len > self.capacity as usize {
            return Err(FlashError::OutOfBounds {
                offset,
                len: len as u32,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl FlashDevice for FileFlash {
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_bounds(offset, buf.len())?;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&self, offset: u32, data: &[u8]) -> Result<usize, FlashError> {
        self.check_bounds(offset, data.len())?;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(data.len())
    }

    fn erase(&self, offset: u32, len: u32) -> Result<(), FlashError> {
        if offset % self.block_size != 0 || len % self.block_size != 0 {
            return Err(FlashError::Unaligned {
                offset,
                len,
                block: self.block_size,
            });
        }
        self.check_bounds(offset, len as usize)?;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&vec![ERASED; len as usize])?;
        file.flush()?;
        Ok(())
    }

    fn erase_block_size(&self) -> u32 {
        self.block_size
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}
