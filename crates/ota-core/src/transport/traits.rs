//! Transport layer abstraction.
//!
//! The engine does not own connections; a `Transport` just hands over the
//! received byte stream in order, chunk by chunk, with no gaps. Loss and
//! retry live below this seam.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed by peer")]
    Closed,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered chunk source feeding the payload parser.
///
/// `Ok(None)` signals a clean end of stream; an error means the transfer
/// was interrupted and the caller must abort the session.
pub trait Transport {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}
