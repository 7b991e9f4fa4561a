//! Partition upgrade engine.
//!
//! Owns the target-partition write cursor for one in-flight firmware
//! transfer and the persisted boot-slot pointer. At most one session is
//! live at a time, the running partition is never written, and the boot
//! pointer only ever moves to a partition whose session committed.

use std::fmt;

use tracing::{debug, info, warn};

use crate::bootconf::BootConfig;
use crate::partition::{Partition, PartitionTable};
use crate::storage::{FlashDevice, FlashError};
use crate::verify::Verifier;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("An upgrade session is already in progress")]
    AlreadyInProgress,

    #[error("Invalid target partition: {0}")]
    InvalidPartition(String),

    #[error("Write overflows declared image size: {written} + {len} > {expected}")]
    Overflow { written: u32, len: u32, expected: u32 },

    #[error("Image incomplete: {written} of {expected} bytes written")]
    SizeMismatch { written: u32, expected: u32 },

    #[error("Operation not allowed in state {0}")]
    State(UpgradeStatus),

    #[error("Partition '{0}' has no committed image")]
    NotCommitted(String),

    #[error("No boot configuration partition in table")]
    NoBootConfig,

    #[error("Storage error: {0}")]
    Storage(#[from] FlashError),
}

/// Lifecycle of the current (or most recent) upgrade session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeStatus {
    #[default]
    Idle,
    Writing,
    Verifying,
    Committed,
    Aborted,
    Failed,
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeStatus::Idle => write!(f, "IDLE"),
            UpgradeStatus::Writing => write!(f, "WRITING"),
            UpgradeStatus::Verifying => write!(f, "VERIFYING"),
            UpgradeStatus::Committed => write!(f, "COMMITTED"),
            UpgradeStatus::Aborted => write!(f, "ABORTED"),
            UpgradeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Upgrade engine interface driven by the payload parser.
///
/// Backed by [`FlashUpgrader`] in production; tests may substitute their
/// own implementation to observe call sequences.
pub trait Upgrader {
    /// Open a write session for `partition`, expecting `expected_size` bytes.
    fn begin(&mut self, partition: &Partition, expected_size: u32) -> Result<(), UpgradeError>;

    /// Append bytes at the cursor; returns how many were consumed. The
    /// medium may throttle, so callers loop until the buffer is drained.
    fn write(&mut self, buf: &[u8]) -> Result<usize, UpgradeError>;

    /// Close the session. `Ok(true)` commits; `Ok(false)` means the
    /// integrity check failed and the partition must not be booted.
    fn end(&mut self, declared_digest: Option<&[u8]>) -> Result<bool, UpgradeError>;

    /// Cancel any session unconditionally. Always succeeds.
    fn abort(&mut self) -> bool;

    /// Persist `partition` as the slot to boot after next restart.
    fn set_boot_partition(&mut self, partition: &Partition) -> Result<(), UpgradeError>;

    /// Partition the bootloader will use on next restart.
    fn get_boot_partition(&self) -> Result<Partition, UpgradeError>;

    /// Partition the current application is executing from.
    fn get_running_partition(&self) -> Partition;

    /// Ring search for the next upgrade target: the first OTA partition
    /// after `start_from` (default: current boot partition) that is not the
    /// running one.
    fn get_next_boot_partition(&self, start_from: Option<&Partition>) -> Option<Partition>;

    fn status(&self) -> UpgradeStatus;
}

struct Session {
    target: Partition,
    expected: u32,
    written: u32,
    /// High-water mark of erased bytes within the target.
    erased: u32,
}

/// Flash-backed upgrade engine.
///
/// Construct with [`FlashUpgrader::new`] for the plain variant, then chain
/// [`FlashUpgrader::with_verifier`] for the signing variant.
pub struct FlashUpgrader<F: FlashDevice> {
    flash: F,
    table: PartitionTable,
    running_slot: u8,
    bootconf: Option<BootConfig>,
    verifier: Option<Box<dyn Verifier>>,
    session: Option<Session>,
    status: UpgradeStatus,
    /// Slot committed by the most recent successful `end()`.
    last_committed: Option<u8>,
}

impl<F: FlashDevice> FlashUpgrader<F> {
    pub fn new(
        flash: F,
        table: PartitionTable,
        running_slot: u8,
    ) -> Result<Self, UpgradeError> {
        if table.find_ota(running_slot).is_none() {
            return Err(UpgradeError::InvalidPartition(format!(
                "running slot {running_slot} not in partition table"
            )));
        }
        let bootconf = match table.boot_config() {
            Some(p) => {
                // Rewriting the record erases a whole block; the region must
                // contain it or the erase would spill into a neighbor.
                let block = flash.erase_block_size();
                if p.offset % block != 0 || p.size < block {
                    return Err(UpgradeError::InvalidPartition(format!(
                        "{p} cannot hold an erase block of 0x{block:X}"
                    )));
                }
                Some(BootConfig::new(p.clone()))
            }
            None => {
                warn!("Partition table has no boot config region; commits cannot be persisted");
                None
            }
        };
        Ok(Self {
            flash,
            table,
            running_slot,
            bootconf,
            verifier: None,
            session: None,
            status: UpgradeStatus::Idle,
            last_committed: None,
        })
    }

    /// Attach an integrity verifier, making `end()` require a matching
    /// declared digest.
    pub fn with_verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn partition_table(&self) -> &PartitionTable {
        &self.table
    }

    pub fn bytes_written(&self) -> u32 {
        self.session.as_ref().map(|s| s.written).unwrap_or(0)
    }

    pub fn expected_size(&self) -> u32 {
        self.session.as_ref().map(|s| s.expected).unwrap_or(0)
    }

    fn goto_status(&mut self, new: UpgradeStatus) {
        debug!(from = %self.status, to = %new, "Upgrade status");
        self.status = new;
    }

    /// Erase ahead of the cursor so the next `upto` bytes are programmable.
    fn erase_ahead(&mut self, upto: u32) -> Result<(), FlashError> {
        let block = self.flash.erase_block_size();
        let session = self.session.as_mut().unwrap();
        while session.erased < upto {
            self.flash.erase(session.target.offset + session.erased, block)?;
            session.erased += block;
        }
        Ok(())
    }
}

impl<F: FlashDevice> Upgrader for FlashUpgrader<F> {
    fn begin(&mut self, partition: &Partition, expected_size: u32) -> Result<(), UpgradeError> {
        if self.session.is_some() {
            // Leave the live session untouched.
            return Err(UpgradeError::AlreadyInProgress);
        }

        let slot = partition.slot().ok_or_else(|| {
            UpgradeError::InvalidPartition(format!("{} is not an application partition", partition))
        })?;
        if slot == self.running_slot {
            return Err(UpgradeError::InvalidPartition(format!(
                "{partition} is the running partition"
            )));
        }
        if expected_size > partition.size {
            return Err(UpgradeError::InvalidPartition(format!(
                "image of {expected_size} bytes exceeds {partition}"
            )));
        }
        let block = self.flash.erase_block_size();
        if partition.offset % block != 0 || partition.size % block != 0 {
            return Err(UpgradeError::InvalidPartition(format!(
                "{partition} is not aligned to erase block 0x{block:X}"
            )));
        }

        // The target's previous image, committed or not, is history now.
        if self.last_committed == Some(slot) {
            self.last_committed = None;
        }

        if let Some(v) = self.verifier.as_mut() {
            v.reset();
        }

        info!(target = %partition, size = expected_size, "Upgrade session opened");
        self.session = Some(Session {
            target: partition.clone(),
            expected: expected_size,
            written: 0,
            erased: 0,
        });
        self.goto_status(UpgradeStatus::Writing);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, UpgradeError> {
        if self.status != UpgradeStatus::Writing || self.session.is_none() {
            return Err(UpgradeError::State(self.status));
        }
        let (written, expected, offset) = {
            let s = self.session.as_ref().unwrap();
            (s.written, s.expected, s.target.offset)
        };

        let len = buf.len() as u32;
        if written + len > expected {
            self.goto_status(UpgradeStatus::Failed);
            self.session = None;
            return Err(UpgradeError::Overflow {
                written,
                len,
                expected,
            });
        }

        if let Err(e) = self.erase_ahead(written + len) {
            self.goto_status(UpgradeStatus::Failed);
            self.session = None;
            return Err(e.into());
        }

        let consumed = match self.flash.write(offset + written, buf) {
            Ok(n) => n,
            Err(e) => {
                self.goto_status(UpgradeStatus::Failed);
                self.session = None;
                return Err(e.into());
            }
        };

        if let Some(v) = self.verifier.as_mut() {
            v.update(&buf[..consumed]);
        }
        self.session.as_mut().unwrap().written += consumed as u32;
        Ok(consumed)
    }

    fn end(&mut self, declared_digest: Option<&[u8]>) -> Result<bool, UpgradeError> {
        if self.status != UpgradeStatus::Writing || self.session.is_none() {
            return Err(UpgradeError::State(self.status));
        }
        let session = self.session.take().unwrap();

        if session.written != session.expected {
            self.goto_status(UpgradeStatus::Failed);
            return Err(UpgradeError::SizeMismatch {
                written: session.written,
                expected: session.expected,
            });
        }

        self.goto_status(UpgradeStatus::Verifying);
        if let Some(v) = self.verifier.as_mut() {
            let ok = match declared_digest {
                Some(d) => v.finalize_matches(d),
                None => {
                    warn!("Verifier configured but transfer declared no digest");
                    false
                }
            };
            if !ok {
                // Content stays in place but is never marked bootable.
                self.goto_status(UpgradeStatus::Failed);
                return Ok(false);
            }
        }

        let slot = session.target.slot().unwrap();
        info!(target = %session.target, bytes = session.written, "Upgrade committed");
        self.last_committed = Some(slot);
        self.goto_status(UpgradeStatus::Committed);
        Ok(true)
    }

    fn abort(&mut self) -> bool {
        if let Some(session) = self.session.take() {
            info!(target = %session.target, written = session.written, "Upgrade aborted");
            self.goto_status(UpgradeStatus::Aborted);
        }
        true
    }

    fn set_boot_partition(&mut self, partition: &Partition) -> Result<(), UpgradeError> {
        let slot = partition.slot().ok_or_else(|| {
            UpgradeError::InvalidPartition(format!("{partition} is not an application partition"))
        })?;
        if self.last_committed != Some(slot) {
            return Err(UpgradeError::NotCommitted(partition.name.clone()));
        }
        let conf = self.bootconf.as_ref().ok_or(UpgradeError::NoBootConfig)?;
        conf.write_slot(&self.flash, slot)?;
        info!(slot, "Boot partition updated");
        Ok(())
    }

    fn get_boot_partition(&self) -> Result<Partition, UpgradeError> {
        let running = self.get_running_partition();
        let Some(conf) = self.bootconf.as_ref() else {
            return Ok(running);
        };
        match conf.read_slot(&self.flash)? {
            Some(slot) => Ok(self.table.find_ota(slot).cloned().unwrap_or(running)),
            None => Ok(running),
        }
    }

    fn get_running_partition(&self) -> Partition {
        // Validated at construction.
        self.table
            .find_ota(self.running_slot)
            .cloned()
            .expect("running slot present in table")
    }

    fn get_next_boot_partition(&self, start_from: Option<&Partition>) -> Option<Partition> {
        let start_slot = match start_from.and_then(|p| p.slot()) {
            Some(slot) => slot,
            None => self
                .get_boot_partition()
                .ok()
                .and_then(|p| p.slot())
                .unwrap_or(self.running_slot),
        };

        let slots: Vec<u8> = self.table.iter_ota().filter_map(|p| p.slot()).collect();
        if slots.is_empty() {
            return None;
        }
        // Position just after the starting slot in ring order.
        let begin = match slots.iter().position(|&s| s > start_slot) {
            Some(i) => i,
            None => 0,
        };
        for i in 0..slots.len() {
            let slot = slots[(begin + i) % slots.len()];
            if slot != self.running_slot {
                return self.table.find_ota(slot).cloned();
            }
        }
        None
    }

    fn status(&self) -> UpgradeStatus {
        self.status
    }
}
