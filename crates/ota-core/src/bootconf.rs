//! Persisted boot-slot record.
//!
//! A small fixed-location record in the bootloader-reserved partition names
//! the application slot to execute after the next restart. The bootloader
//! reads it; this engine only ever rewrites it after a committed upgrade.
//!
//! Layout (12 bytes, little-endian): magic `u32`, slot `u32`,
//! checksum `u32` = magic ^ slot. A record that fails the magic or checksum
//! test reads as absent, never as a slot.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::partition::Partition;
use crate::storage::{FlashDevice, FlashError};

/// Record magic: "BSL0".
pub const BOOT_RECORD_MAGIC: u32 = 0x304C5342;

/// Record length in bytes.
pub const BOOT_RECORD_LEN: usize = 12;

/// Reader/writer for the boot-slot record inside one partition.
pub struct BootConfig {
    partition: Partition,
}

impl BootConfig {
    pub fn new(partition: Partition) -> Self {
        Self { partition }
    }

    /// Read the persisted boot slot. Corrupt or blank records yield `None`.
    pub fn read_slot<F: FlashDevice>(&self, flash: &F) -> Result<Option<u8>, FlashError> {
        let mut buf = [0u8; BOOT_RECORD_LEN];
        flash.read(self.partition.offset, &mut buf)?;

        let magic = LittleEndian::read_u32(&buf[0..4]);
        let slot = LittleEndian::read_u32(&buf[4..8]);
        let checksum = LittleEndian::read_u32(&buf[8..12]);

        if magic != BOOT_RECORD_MAGIC || checksum != (magic ^ slot) || slot > u8::MAX as u32 {
            warn!(magic = format!("{magic:08X}"), "Boot record invalid or blank");
            return Ok(None);
        }
        Ok(Some(slot as u8))
    }

    /// Persist `slot` as the boot slot, replacing any previous record.
    pub fn write_slot<F: FlashDevice>(&self, flash: &F, slot: u8) -> Result<(), FlashError> {
        let mut buf = [0u8; BOOT_RECORD_LEN];
        LittleEndian::write_u32(&mut buf[0..4], BOOT_RECORD_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], slot as u32);
        LittleEndian::write_u32(&mut buf[8..12], BOOT_RECORD_MAGIC ^ slot as u32);

        // The record sits at the start of its own block; erase just that
        // one, and only if the partition actually contains it.
        let block = flash.erase_block_size();
        if self.partition.size < block {
            return Err(FlashError::Unaligned {
                offset: self.partition.offset,
                len: block,
                block,
            });
        }
        flash.erase(self.partition.offset, block)?;

        let mut written = 0;
        while written < buf.len() {
            written += flash.write(self.partition.offset + written as u32, &buf[written..])?;
        }
        debug!(slot, "Boot record written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionType;
    use crate::storage::MemFlash;

    fn boot_partition() -> Partition {
        Partition {
            ptype: PartitionType::BootConfig,
            offset: 0,
            size: 0x1000,
            name: "boot".into(),
        }
    }

    #[test]
    fn test_blank_record_reads_none() {
        let flash = MemFlash::new(0x2000, 0x1000);
        let conf = BootConfig::new(boot_partition());
        assert_eq!(conf.read_slot(&flash).unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let flash = MemFlash::new(0x2000, 0x1000);
        let conf = BootConfig::new(boot_partition());
        conf.write_slot(&flash, 1).unwrap();
        assert_eq!(conf.read_slot(&flash).unwrap(), Some(1));

        conf.write_slot(&flash, 0).unwrap();
        assert_eq!(conf.read_slot(&flash).unwrap(), Some(0));
    }

    #[test]
    fn test_write_refused_when_region_smaller_than_block() {
        let flash = MemFlash::new(0x2000, 0x1000);
        flash.fill(0x100, b"next");
        let conf = BootConfig::new(Partition {
            ptype: PartitionType::BootConfig,
            offset: 0,
            size: 0x100,
            name: "boot".into(),
        });
        assert!(matches!(
            conf.write_slot(&flash, 1),
            Err(FlashError::Unaligned { .. })
        ));
        // The neighboring region was not erased.
        assert_eq!(flash.snapshot(0x100, 4), b"next".to_vec());
    }

    #[test]
    fn test_corrupt_checksum_reads_none() {
        let flash = MemFlash::new(0x2000, 0x1000);
        let conf = BootConfig::new(boot_partition());
        conf.write_slot(&flash, 1).unwrap();

        // Flip a bit in the slot field without fixing the checksum.
        let mut raw = flash.snapshot(0, BOOT_RECORD_LEN as u32);
        raw[4] ^= 0x02;
        flash.fill(0, &raw);

        assert_eq!(conf.read_slot(&flash).unwrap(), None);
    }
}
