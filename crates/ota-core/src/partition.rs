//! Partition registry.
//!
//! Enumerates the fixed storage regions of the device. The table is loaded
//! once from a persisted document and is read-only afterwards; the upgrade
//! engine only ever looks partitions up, it never redefines them.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Duplicate OTA slot {0}")]
    DuplicateSlot(u8),
    #[error("Partitions '{0}' and '{1}' overlap")]
    Overlap(String, String),
    #[error("Partition '{0}' has zero size")]
    ZeroSize(String),
    #[error("Failed to parse partition table: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Kind of storage region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PartitionType {
    /// Application image slot, identified by its OTA ordinal.
    App { slot: u8 },
    /// Generic data region.
    Data,
    /// Bootloader-reserved region holding the boot-slot record.
    BootConfig,
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionType::App { slot } => write!(f, "app/ota{slot}"),
            PartitionType::Data => write!(f, "data"),
            PartitionType::BootConfig => write!(f, "data/boot"),
        }
    }
}

/// Immutable descriptor of one physical storage region.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Partition {
    pub ptype: PartitionType,
    /// Byte offset of the region within the flash device.
    pub offset: u32,
    /// Region size in bytes.
    pub size: u32,
    pub name: String,
}

impl Partition {
    /// OTA slot ordinal, if this is an application partition.
    pub fn slot(&self) -> Option<u8> {
        match self.ptype {
            PartitionType::App { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    fn overlaps(&self, other: &Partition) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, 0x{:06X}+0x{:X})",
            self.name, self.ptype, self.offset, self.size
        )
    }
}

#[derive(Debug, Deserialize)]
struct TableDoc {
    partition: Vec<Partition>,
}

/// Read-only registry of all partitions on the device.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    /// Build a table from descriptors, validating layout.
    pub fn new(partitions: Vec<Partition>) -> Result<Self, TableError> {
        for p in &partitions {
            if p.size == 0 {
                return Err(TableError::ZeroSize(p.name.clone()));
            }
        }
        for (i, a) in partitions.iter().enumerate() {
            for b in &partitions[i + 1..] {
                if a.overlaps(b) {
                    return Err(TableError::Overlap(a.name.clone(), b.name.clone()));
                }
                if let (Some(sa), Some(sb)) = (a.slot(), b.slot())
                    && sa == sb
                {
                    return Err(TableError::DuplicateSlot(sa));
                }
            }
        }
        Ok(Self { partitions })
    }

    /// Parse a persisted table document (TOML).
    pub fn from_toml(text: &str) -> Result<Self, TableError> {
        let doc: TableDoc = toml::from_str(text)?;
        Self::new(doc.partition)
    }

    /// Find the application partition for an OTA slot.
    pub fn find_ota(&self, slot: u8) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.slot() == Some(slot))
    }

    /// Iterate partitions of one type, in table order.
    pub fn iter_type(&self, ptype: PartitionType) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(move |p| p.ptype == ptype)
    }

    /// Iterate all application partitions, in slot order.
    pub fn iter_ota(&self) -> impl Iterator<Item = &Partition> {
        let mut apps: Vec<&Partition> = self
            .partitions
            .iter()
            .filter(|p| p.slot().is_some())
            .collect();
        apps.sort_by_key(|p| p.slot());
        apps.into_iter()
    }

    /// OTA slot ordinal of a partition, `None` for non-application regions.
    pub fn slot_of(&self, partition: &Partition) -> Option<u8> {
        partition.slot()
    }

    /// The bootloader configuration partition, if the table defines one.
    pub fn boot_config(&self) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.ptype == PartitionType::BootConfig)
    }

    /// Number of application slots.
    pub fn ota_slot_count(&self) -> usize {
        self.partitions.iter().filter(|p| p.slot().is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn app(slot: u8, offset: u32, size: u32) -> Partition {
        Partition {
            ptype: PartitionType::App { slot },
            offset,
            size,
            name: format!("ota{slot}"),
        }
    }

    #[test]
    fn test_find_ota_and_slot_of() {
        let table =
            PartitionTable::new(vec![app(0, 0x1000, 0x1000), app(1, 0x2000, 0x1000)]).unwrap();
        assert_eq!(table.find_ota(1).unwrap().offset, 0x2000);
        assert!(table.find_ota(2).is_none());

        let boot = Partition {
            ptype: PartitionType::BootConfig,
            offset: 0,
            size: 0x1000,
            name: "boot".into(),
        };
        assert_eq!(table.slot_of(table.find_ota(0).unwrap()), Some(0));
        assert_eq!(table.slot_of(&boot), None);
    }

    #[test]
    fn test_rejects_overlap() {
        let err = PartitionTable::new(vec![app(0, 0x1000, 0x2000), app(1, 0x2000, 0x1000)]);
        assert!(matches!(err, Err(TableError::Overlap(..))));
    }

    #[test]
    fn test_rejects_duplicate_slot() {
        let err = PartitionTable::new(vec![app(0, 0x1000, 0x1000), app(0, 0x3000, 0x1000)]);
        assert!(matches!(err, Err(TableError::DuplicateSlot(0))));
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            [[partition]]
            name = "boot"
            offset = 0x0000
            size = 0x1000
            ptype = { kind = "boot_config" }

            [[partition]]
            name = "ota0"
            offset = 0x1000
            size = 0x4000
            ptype = { kind = "app", slot = 0 }

            [[partition]]
            name = "ota1"
            offset = 0x5000
            size = 0x4000
            ptype = { kind = "app", slot = 1 }
        "#;
        let table = PartitionTable::from_toml(text).unwrap();
        assert_eq!(table.ota_slot_count(), 2);
        assert_eq!(table.boot_config().unwrap().name, "boot");
        let slots: Vec<u8> = table.iter_ota().filter_map(|p| p.slot()).collect();
        assert_eq!(slots, vec![0, 1]);
    }
}
