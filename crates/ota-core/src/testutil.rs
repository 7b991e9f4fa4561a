//! Shared test fixtures: canned partition layouts and a framed-transfer
//! builder. Test-only; the engine never produces transfer images.

use sha2::{Digest, Sha256};

use crate::partition::{Partition, PartitionTable, PartitionType};
use crate::protocol::constants::*;
use crate::protocol::header::{ImageHeader, SegmentHeader};

/// Boot config at 0x0000, two app slots of 0x1000 at 0x1000/0x2000.
pub(crate) fn test_table() -> PartitionTable {
    PartitionTable::new(vec![
        Partition {
            ptype: PartitionType::BootConfig,
            offset: 0,
            size: 0x100,
            name: "boot".into(),
        },
        Partition {
            ptype: PartitionType::App { slot: 0 },
            offset: 0x1000,
            size: 0x1000,
            name: "ota0".into(),
        },
        Partition {
            ptype: PartitionType::App { slot: 1 },
            offset: 0x2000,
            size: 0x1000,
            name: "ota1".into(),
        },
    ])
    .unwrap()
}

/// Assembles a wire-format transfer around a firmware body.
pub(crate) struct TransferBuilder {
    body: Vec<u8>,
    segment_lens: Vec<usize>,
    declared_total: Option<u32>,
    trailer: bool,
    corrupt_digest: bool,
    bogus_tag: Option<u32>,
    xor_key: Option<Vec<u8>>,
}

impl TransferBuilder {
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            segment_lens: vec![body.len()],
            declared_total: None,
            trailer: true,
            corrupt_digest: false,
            bogus_tag: None,
            xor_key: None,
        }
    }

    /// Split the body into segments of these lengths (must sum to the body).
    pub fn segments(mut self, lens: &[usize]) -> Self {
        assert_eq!(lens.iter().sum::<usize>(), self.body.len());
        self.segment_lens = lens.to_vec();
        self
    }

    /// Override the header's declared total size.
    pub fn declare_total(mut self, total: u32) -> Self {
        self.declared_total = Some(total);
        self
    }

    /// Omit the digest trailer and clear the trailer flag.
    pub fn no_trailer(mut self) -> Self {
        self.trailer = false;
        self
    }

    /// Flip bytes in the trailing digest.
    pub fn corrupt_digest(mut self) -> Self {
        self.corrupt_digest = true;
        self
    }

    /// Use `tag` instead of DATA for the first segment.
    pub fn bogus_tag(mut self, tag: u32) -> Self {
        self.bogus_tag = Some(tag);
        self
    }

    /// XOR-encrypt segment bodies; the digest still covers the plaintext.
    pub fn encrypt(mut self, key: &[u8]) -> Self {
        self.xor_key = Some(key.to_vec());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut flags = 0u16;
        if self.trailer {
            flags |= FLAG_SHA256;
        }
        if self.xor_key.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        let total = self.declared_total.unwrap_or(self.body.len() as u32);

        let mut stream = ImageHeader::new(total, flags).to_bytes();

        let mut keystream = 0usize;
        let mut offset = 0usize;
        for (i, &len) in self.segment_lens.iter().enumerate() {
            let tag = match (i, self.bogus_tag) {
                (0, Some(t)) => t,
                _ => SEG_DATA,
            };
            stream.extend_from_slice(&SegmentHeader::new(tag, len as u32).to_bytes());

            let chunk = &self.body[offset..offset + len];
            match &self.xor_key {
                Some(key) => {
                    for &b in chunk {
                        stream.push(b ^ key[keystream % key.len()]);
                        keystream += 1;
                    }
                }
                None => stream.extend_from_slice(chunk),
            }
            offset += len;
        }
        stream.extend_from_slice(&SegmentHeader::new(SEG_END, 0).to_bytes());

        if self.trailer {
            let mut digest = Sha256::digest(&self.body).to_vec();
            if self.corrupt_digest {
                digest[0] ^= 0xFF;
                digest[31] ^= 0xFF;
            }
            stream.extend_from_slice(&digest);
        }
        stream
    }
}
