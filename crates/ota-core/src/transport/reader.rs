//! Reader-backed transport.

use std::io::Read;

use super::traits::{Transport, TransportError};

/// Delivers a `Read` source (file, socket, stdin) in fixed-size chunks.
pub struct ReaderTransport<R: Read> {
    reader: R,
    chunk_size: usize,
}

impl<R: Read> ReaderTransport<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: Read> Transport for ReaderTransport<R> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
