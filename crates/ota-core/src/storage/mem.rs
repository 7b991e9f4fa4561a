//! In-memory flash device for testing.

use std::sync::{Arc, Mutex};

use super::traits::{FlashDevice, FlashError};

const ERASED: u8 = 0xFF;

struct Inner {
    data: Vec<u8>,
    /// Max bytes accepted per write call, when simulating a slow medium.
    throttle: Option<usize>,
    /// Writes remaining before an injected fault fires.
    writes_until_fault: Option<usize>,
    write_count: usize,
    erase_count: usize,
}

/// Mock flash for unit testing the upgrade engine.
///
/// Clonable handle over shared state, so tests can keep a copy and inspect
/// contents after the engine has taken ownership of another.
#[derive(Clone)]
pub struct MemFlash {
    inner: Arc<Mutex<Inner>>,
    block_size: u32,
}

impl MemFlash {
    pub fn new(capacity: u32, block_size: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: vec![ERASED; capacity as usize],
                throttle: None,
                writes_until_fault: None,
                write_count: 0,
                erase_count: 0,
            })),
            block_size,
        }
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_throttle(&self, limit: usize) {
        self.inner.lock().unwrap().throttle = Some(limit);
    }

    /// Fail with a device fault after `n` more successful writes.
    pub fn fail_after_writes(&self, n: usize) {
        self.inner.lock().unwrap().writes_until_fault = Some(n);
    }

    /// Snapshot a byte range.
    pub fn snapshot(&self, offset: u32, len: u32) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        inner.data[offset as usize..(offset + len) as usize].to_vec()
    }

    /// Overwrite a range directly, bypassing erase rules. Test setup only.
    pub fn fill(&self, offset: u32, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().write_count
    }

    pub fn erase_count(&self) -> usize {
        self.inner.lock().unwrap().erase_count
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<(), FlashError> {
        let capacity = self.capacity();
        if offset as usize + len > capacity as usize {
            return Err(FlashError::OutOfBounds {
                offset,
                len: len as u32,
                capacity,
            });
        }
        Ok(())
    }
}

impl FlashDevice for MemFlash {
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_bounds(offset, buf.len())?;
        let inner = self.inner.lock().unwrap();
        buf.copy_from_slice(&inner.data[offset as usize..offset as usize + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: u32, data: &[u8]) -> Result<usize, FlashError> {
        self.check_bounds(offset, data.len())?;
        let mut inner = self.inner.lock().unwrap();

        if let Some(n) = inner.writes_until_fault {
            if n == 0 {
                return Err(FlashError::Device("injected write fault".into()));
            }
            inner.writes_until_fault = Some(n - 1);
        }

        let len = match inner.throttle {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        inner.data[offset as usize..offset as usize + len].copy_from_slice(&data[..len]);
        inner.write_count += 1;
        Ok(len)
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
        let mut inner = self.inner.lock().unwrap();
        inner.data[offset as usize..(offset + len) as usize].fill(ERASED);
        inner.erase_count += 1;
        Ok(())
    }

    fn erase_block_size(&self) -> u32 {
        self.block_size
    }

    fn capacity(&self) -> u32 {
        self.inner.lock().unwrap().data.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let flash = MemFlash::new(0x1000, 0x100);
        assert_eq!(flash.write(0x10, b"hello").unwrap(), 5);

        let mut buf = [0u8; 5];
        flash.read(0x10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_erase_resets_to_ff() {
        let flash = MemFlash::new(0x1000, 0x100);
        flash.write(0x100, b"data").unwrap();
        flash.erase(0x100, 0x100).unwrap();
        assert_eq!(flash.snapshot(0x100, 4), vec![0xFF; 4]);
    }

    #[test]
    fn test_erase_alignment_enforced() {
        let flash = MemFlash::new(0x1000, 0x100);
        assert!(matches!(
            flash.erase(0x80, 0x100),
            Err(FlashError::Unaligned { .. })
        ));
        assert!(matches!(
            flash.erase(0x100, 0x80),
            Err(FlashError::Unaligned { .. })
        ));
    }

    #[test]
    fn test_throttle_limits_write() {
        let flash = MemFlash::new(0x1000, 0x100);
        flash.set_throttle(3);
        assert_eq!(flash.write(0, b"abcdef").unwrap(), 3);
        assert_eq!(flash.snapshot(0, 3), b"abc".to_vec());
    }

    #[test]
    fn test_fault_injection() {
        let flash = MemFlash::new(0x1000, 0x100);
        flash.fail_after_writes(1);
        assert!(flash.write(0, b"ok").is_ok());
        assert!(matches!(
            flash.write(2, b"boom"),
            Err(FlashError::Device(_))
        ));
    }

    #[test]
    fn test_out_of_bounds() {
        let flash = MemFlash::new(0x100, 0x100);
        assert!(matches!(
            flash.write(0xFE, b"xyz"),
            Err(FlashError::OutOfBounds { .. })
        ));
    }
}
