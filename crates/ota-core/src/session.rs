//! Update session - high-level orchestrator for one firmware transfer.
//!
//! Pulls chunks from a transport, feeds the parser, and on success flips
//! the boot pointer to the freshly committed slot. One session equals one
//! transfer; retries are the caller's decision and always start a new
//! session with fresh parser state.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::events::{FailReason, TracingObserver, UpdateEvent, UpdateObserver};
use crate::parser::{BasicPayloadParser, FeedStatus, PayloadParser};
use crate::storage::FlashDevice;
use crate::transform::{Transform, XorCipher};
use crate::transport::Transport;
use crate::upgrader::{FlashUpgrader, Upgrader};

/// Configuration for an update session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transport read granularity, in bytes.
    pub chunk_size: usize,
    /// Flip the boot pointer after a successful transfer.
    pub commit: bool,
    /// Hex-encoded key for encrypted transfers; absent means plaintext.
    pub xor_key: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            commit: true,
            xor_key: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Drives one complete firmware transfer end to end.
pub struct UpdateSession<F: FlashDevice, O: UpdateObserver> {
    config: SessionConfig,
    upgrader: FlashUpgrader<F>,
    observer: Arc<O>,
}

impl<F: FlashDevice> UpdateSession<F, TracingObserver> {
    /// Create a session with the default tracing observer.
    pub fn new(config: SessionConfig, upgrader: FlashUpgrader<F>) -> Self {
        Self::with_observer(config, upgrader, Arc::new(TracingObserver))
    }
}

impl<F: FlashDevice, O: UpdateObserver + 'static> UpdateSession<F, O> {
    pub fn with_observer(
        config: SessionConfig,
        upgrader: FlashUpgrader<F>,
        observer: Arc<O>,
    ) -> Self {
        Self {
            config,
            upgrader,
            observer,
        }
    }

    /// Hand the upgrader back once the session is over.
    pub fn into_upgrader(self) -> FlashUpgrader<F> {
        self.upgrader
    }

    /// Run the transfer to completion. Returns the slot that will boot
    /// after the next restart.
    #[instrument(skip(self, transport))]
    pub fn run(&mut self, transport: &mut dyn Transport) -> Result<u8> {
        match self.config.xor_key.clone() {
            Some(key) => {
                let key = hex::decode(&key).context("xor_key is not valid hex")?;
                let parser = PayloadParser::with_transform(XorCipher::new(key))
                    .with_observer(self.observer.clone() as Arc<dyn UpdateObserver>);
                self.drive(transport, parser)
            }
            None => {
                let parser = BasicPayloadParser::new()
                    .with_observer(self.observer.clone() as Arc<dyn UpdateObserver>);
                self.drive(transport, parser)
            }
        }
    }

    fn drive<T: Transform>(
        &mut self,
        transport: &mut dyn Transport,
        mut parser: PayloadParser<T>,
    ) -> Result<u8> {
        loop {
            let chunk = match transport.next_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    // Stream ended before the transfer did.
                    warn!("Transport closed mid-transfer");
                    self.upgrader.abort();
                    self.observer.on_event(&UpdateEvent::Failed {
                        reason: FailReason::Transport,
                        detail: "stream ended before transfer completed".into(),
                    });
                    bail!("transport closed before transfer completed");
                }
                Err(e) => {
                    warn!(error = %e, "Transport failure");
                    self.upgrader.abort();
                    self.observer.on_event(&UpdateEvent::Failed {
                        reason: FailReason::Transport,
                        detail: e.to_string(),
                    });
                    return Err(e).context("transport failure mid-transfer");
                }
            };

            match parser.feed(&mut self.upgrader, &chunk)? {
                FeedStatus::InProgress => continue,
                FeedStatus::Done => break,
                FeedStatus::Failed(reason) => {
                    // Parser already aborted the session and emitted the
                    // terminal event.
                    bail!("transfer failed: {reason}");
                }
            }
        }

        let slot = parser
            .target_slot()
            .context("parser finished without a target slot")?;

        if self.config.commit {
            let target = self
                .upgrader
                .partition_table()
                .find_ota(slot)
                .cloned()
                .context("committed slot vanished from partition table")?;
            self.upgrader.set_boot_partition(&target)?;
        } else {
            info!(slot, "Commit disabled; boot pointer left unchanged");
        }

        self.observer.on_event(&UpdateEvent::Completed { slot });
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::storage::MemFlash;
    use crate::testutil::{TransferBuilder, test_table};
    use crate::transport::MockTransport;
    use crate::upgrader::UpgradeStatus;
    use crate::verify::Sha256Verifier;

    const BLOCK: u32 = 0x100;

    fn session(flash: &MemFlash, config: SessionConfig) -> UpdateSession<MemFlash, NullObserver> {
        let upgrader = FlashUpgrader::new(flash.clone(), test_table(), 0)
            .unwrap()
            .with_verifier(Box::new(Sha256Verifier::new()));
        UpdateSession::with_observer(config, upgrader, Arc::new(NullObserver))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_run_commits_and_flips_boot_slot() {
        let body = payload(1000);
        let stream = TransferBuilder::new(&body)
            .segments(&[400, 350, 250])
            .build();

        let flash = MemFlash::new(0x3000, BLOCK);
        let mut sess = session(&flash, SessionConfig::default());
        let mut transport = MockTransport::new();
        transport.queue_split(&stream, 97);

        let slot = sess.run(&mut transport).unwrap();
        assert_eq!(slot, 1);

        let up = sess.into_upgrader();
        assert_eq!(up.get_boot_partition().unwrap().slot(), Some(1));
        assert_eq!(flash.snapshot(0x2000, 1000), body);
    }

    #[test]
    fn test_transport_drop_aborts_session() {
        let stream = TransferBuilder::new(&payload(500)).segments(&[500]).build();

        let flash = MemFlash::new(0x3000, BLOCK);
        let mut sess = session(&flash, SessionConfig::default());
        let mut transport = MockTransport::new();
        transport.queue_chunk(&stream[..stream.len() / 2]);
        transport.drop_connection_at_end();

        assert!(sess.run(&mut transport).is_err());
        let up = sess.into_upgrader();
        assert_eq!(up.status(), UpgradeStatus::Aborted);
        assert_eq!(up.get_boot_partition().unwrap().slot(), Some(0));
    }

    #[test]
    fn test_clean_eof_mid_transfer_aborts() {
        let stream = TransferBuilder::new(&payload(500)).segments(&[500]).build();

        let flash = MemFlash::new(0x3000, BLOCK);
        let mut sess = session(&flash, SessionConfig::default());
        let mut transport = MockTransport::new();
        transport.queue_chunk(&stream[..100]);

        assert!(sess.run(&mut transport).is_err());
        assert_eq!(sess.into_upgrader().status(), UpgradeStatus::Aborted);
    }

    #[test]
    fn test_digest_mismatch_keeps_previous_boot_slot() {
        let stream = TransferBuilder::new(&payload(300))
            .segments(&[300])
            .corrupt_digest()
            .build();

        let flash = MemFlash::new(0x3000, BLOCK);
        let mut sess = session(&flash, SessionConfig::default());
        let mut transport = MockTransport::new();
        transport.queue_split(&stream, 64);

        assert!(sess.run(&mut transport).is_err());
        let up = sess.into_upgrader();
        assert_eq!(up.get_boot_partition().unwrap().slot(), Some(0));
    }

    #[test]
    fn test_commit_disabled_leaves_boot_pointer() {
        let body = payload(200);
        let stream = TransferBuilder::new(&body).segments(&[200]).build();

        let flash = MemFlash::new(0x3000, BLOCK);
        let config = SessionConfig {
            commit: false,
            ..Default::default()
        };
        let mut sess = session(&flash, config);
        let mut transport = MockTransport::new();
        transport.queue_split(&stream, 32);

        let slot = sess.run(&mut transport).unwrap();
        assert_eq!(slot, 1);
        let up = sess.into_upgrader();
        assert_eq!(up.get_boot_partition().unwrap().slot(), Some(0));
        assert_eq!(flash.snapshot(0x2000, 200), body);
    }

    #[test]
    fn test_encrypted_session_with_config_key() {
        let key = vec![0x11, 0x22, 0x33];
        let body = payload(256);
        let stream = TransferBuilder::new(&body)
            .segments(&[128, 128])
            .encrypt(&key)
            .build();

        let flash = MemFlash::new(0x3000, BLOCK);
        let config = SessionConfig {
            xor_key: Some(hex::encode(&key)),
            ..Default::default()
        };
        let mut sess = session(&flash, config);
        let mut transport = MockTransport::new();
        transport.queue_split(&stream, 13);

        assert_eq!(sess.run(&mut transport).unwrap(), 1);
        assert_eq!(flash.snapshot(0x2000, 256), body);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = SessionConfig {
            chunk_size: 2048,
            commit: false,
            xor_key: Some("a5c399".into()),
        };
        let dir = std::env::temp_dir().join("ota-session-config-test.toml");
        config.save_to_file(&dir).unwrap();
        let loaded = SessionConfig::load_from_file(&dir).unwrap();
        std::fs::remove_file(&dir).ok();

        assert_eq!(loaded.chunk_size, 2048);
        assert!(!loaded.commit);
        assert_eq!(loaded.xor_key.as_deref(), Some("a5c399"));
    }
}
