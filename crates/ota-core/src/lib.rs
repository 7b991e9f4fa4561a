//! OTA-Core: firmware-upgrade engine for slot-based embedded devices.
//!
//! Receives a firmware image over an arbitrary transport and atomically
//! switches to it on the next restart, without ever leaving the device
//! unbootable: the running partition is never written, and the persisted
//! boot pointer only moves after the new image verified in full.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Partition**: read-only registry of storage regions and OTA slots
//! - **Storage**: raw flash abstraction (in-memory, file-backed)
//! - **Bootconf**: persisted boot-slot record read by the bootloader
//! - **Verify**: streaming payload digest
//! - **Upgrader**: begin/write/end/abort session over a target partition
//! - **Protocol**: transfer wire framing (header, segments, trailer)
//! - **Parser**: chunk-reentrant state machine driving the upgrader
//! - **Transport**: ordered chunk delivery abstraction (mock, reader)
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: high-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use ota_core::partition::PartitionTable;
//! use ota_core::session::{SessionConfig, UpdateSession};
//! use ota_core::storage::FileFlash;
//! use ota_core::transport::ReaderTransport;
//! use ota_core::upgrader::FlashUpgrader;
//!
//! let table = PartitionTable::from_toml(
//!     &std::fs::read_to_string("partitions.toml").unwrap(),
//! ).unwrap();
//! let flash = FileFlash::open("flash.img", 4096).unwrap();
//! let upgrader = FlashUpgrader::new(flash, table, 0).unwrap();
//!
//! let mut session = UpdateSession::new(SessionConfig::default(), upgrader);
//! let image = std::fs::File::open("firmware.fwup").unwrap();
//! let mut transport = ReaderTransport::new(image, 512);
//! let slot = session.run(&mut transport).expect("upgrade failed");
//! println!("booting slot {slot} after restart");
//! ```

pub mod bootconf;
pub mod events;
pub mod parser;
pub mod partition;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod transform;
pub mod transport;
pub mod upgrader;
pub mod verify;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use events::{FailReason, NullObserver, TracingObserver, UpdateEvent, UpdateObserver};
pub use parser::{BasicPayloadParser, FeedStatus, ParserState, PayloadParser};
pub use partition::{Partition, PartitionTable, PartitionType};
pub use session::{SessionConfig, UpdateSession};
pub use storage::{FileFlash, FlashDevice, FlashError, MemFlash};
pub use transform::{Identity, Transform, XorCipher};
pub use transport::{MockTransport, ReaderTransport, Transport, TransportError};
pub use upgrader::{FlashUpgrader, UpgradeError, UpgradeStatus, Upgrader};
pub use verify::{Sha256Verifier, Verifier};
