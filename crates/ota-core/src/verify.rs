//! Streaming integrity verification.
//!
//! A `Verifier` accumulates the firmware payload as it streams through the
//! engine and is checked once against the digest declared in the transfer
//! trailer. Constant-time comparison is not required here; the declared
//! digest is public data.

use sha2::{Digest, Sha256};

/// Incremental digest over the streamed payload.
pub trait Verifier: Send {
    /// Absorb the next payload fragment.
    fn update(&mut self, data: &[u8]);

    /// Length of the digest this verifier produces/expects.
    fn digest_len(&self) -> usize;

    /// Finish the computation and compare with the declared value.
    fn finalize_matches(&mut self, declared: &[u8]) -> bool;

    /// Discard accumulated state for a fresh session.
    fn reset(&mut self);
}

/// SHA-256 payload verifier.
pub struct Sha256Verifier {
    hasher: Sha256,
}

impl Sha256Verifier {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }
}

impl Default for Sha256Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier for Sha256Verifier {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn digest_len(&self) -> usize {
        32
    }

    fn finalize_matches(&mut self, declared: &[u8]) -> bool {
        let actual = std::mem::take(&mut self.hasher).finalize();
        let matches = declared == actual.as_slice();
        if !matches {
            tracing::warn!(
                declared = %hex::encode(declared),
                actual = %hex::encode(actual),
                "Digest mismatch"
            );
        }
        matches
    }

    fn reset(&mut self) {
        self.hasher = Sha256::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_matches_known_digest() {
        let mut v = Sha256Verifier::new();
        v.update(b"abc");
        let expected =
            hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap();
        assert!(v.finalize_matches(&expected));
    }

    #[test]
    fn test_incremental_equals_oneshot() {
        let mut split = Sha256Verifier::new();
        split.update(b"hello ");
        split.update(b"world");

        let digest = Sha256::digest(b"hello world");
        assert!(split.finalize_matches(&digest));
    }

    #[test]
    fn test_mismatch_detected() {
        let mut v = Sha256Verifier::new();
        v.update(b"payload");
        assert!(!v.finalize_matches(&[0u8; 32]));
    }
}
