//! Mock transport for testing.

use std::collections::VecDeque;

use super::traits::{Transport, TransportError};

/// Mock transport that replays queued chunks.
#[derive(Default)]
pub struct MockTransport {
    chunks: VecDeque<Vec<u8>>,
    /// When set, fail with this error once the queue drains.
    fail_at_end: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one chunk for delivery.
    pub fn queue_chunk(&mut self, chunk: &[u8]) {
        self.chunks.push_back(chunk.to_vec());
    }

    /// Queue a whole stream split into `chunk_size` pieces.
    pub fn queue_split(&mut self, stream: &[u8], chunk_size: usize) {
        for piece in stream.chunks(chunk_size.max(1)) {
            self.chunks.push_back(piece.to_vec());
        }
    }

    /// Simulate the connection dropping after the queued chunks.
    pub fn drop_connection_at_end(&mut self) {
        self.fail_at_end = true;
    }
}

impl Transport for MockTransport {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None if self.fail_at_end => Err(TransportError::Closed),
            None => Ok(None),
        }
    }
}
