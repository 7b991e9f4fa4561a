//! Transport layer module.

pub mod mock;
pub mod reader;
pub mod traits;

pub use mock::MockTransport;
pub use reader::ReaderTransport;
pub use traits::{Transport, TransportError};
