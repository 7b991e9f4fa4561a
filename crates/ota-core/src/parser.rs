//! Streaming payload parser.
//!
//! Decodes the chunked transfer framing from an arbitrary byte stream and
//! drives the [`Upgrader`] through it. The parser is a push-mode state
//! machine: the transport calls [`PayloadParser::feed`] with whatever
//! fragment it received, and the parser buffers across fragment boundaries
//! so behavior is identical no matter how the stream is split, down to
//! one byte at a time.
//!
//! One parser instance covers exactly one transfer; `Done` and `Error` are
//! sticky and a new transfer takes a fresh parser.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::events::{FailReason, UpdateEvent, UpdateObserver};
use crate::protocol::constants::*;
use crate::protocol::header::{ImageHeader, SegmentHeader};
use crate::transform::{Identity, Transform};
use crate::upgrader::{UpgradeError, Upgrader};

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Parser already reached a terminal state")]
    AlreadyFinished,
}

/// Cursor position within the transfer framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingHeader,
    AwaitingSegmentHeader,
    CopyingSegmentBody,
    AwaitingTrailer,
    Done,
    Error,
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserState::AwaitingHeader => write!(f, "AWAITING_HEADER"),
            ParserState::AwaitingSegmentHeader => write!(f, "AWAITING_SEGMENT_HEADER"),
            ParserState::CopyingSegmentBody => write!(f, "COPYING_SEGMENT_BODY"),
            ParserState::AwaitingTrailer => write!(f, "AWAITING_TRAILER"),
            ParserState::Done => write!(f, "DONE"),
            ParserState::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of one `feed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// More bytes needed.
    InProgress,
    /// Transfer decoded and committed by the upgrader.
    Done,
    /// Transfer failed; session aborted, reason attached.
    Failed(FailReason),
}

/// Parser over plaintext transfers.
pub type BasicPayloadParser = PayloadParser<Identity>;

/// State machine decoding one firmware transfer.
///
/// Generic over the body [`Transform`]: [`Identity`] streams raw bytes, a
/// cipher transform gives the decrypting variant. Dispatch is static; the
/// variant is fixed at construction.
pub struct PayloadParser<T: Transform = Identity> {
    state: ParserState,
    /// Accumulates partial header/trailer bytes across fragments.
    buf: Vec<u8>,
    header: Option<ImageHeader>,
    target_slot: Option<u8>,
    /// Bytes left in the current segment body.
    remaining: u32,
    /// Transformed bytes handed to the upgrader so far.
    written: u64,
    transform: T,
    reason: Option<FailReason>,
    observer: Option<Arc<dyn UpdateObserver>>,
}

impl PayloadParser<Identity> {
    pub fn new() -> Self {
        Self::with_transform(Identity)
    }
}

impl Default for PayloadParser<Identity> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transform> PayloadParser<T> {
    /// Advanced variant: run segment bodies through `transform` before the
    /// upgrader sees them.
    pub fn with_transform(transform: T) -> Self {
        Self {
            state: ParserState::AwaitingHeader,
            buf: Vec::new(),
            header: None,
            target_slot: None,
            remaining: 0,
            written: 0,
            transform,
            reason: None,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn UpdateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Failure reason once the parser is in `Error`.
    pub fn fail_reason(&self) -> Option<FailReason> {
        self.reason
    }

    /// Slot the transfer targeted, known once the header was decoded.
    pub fn target_slot(&self) -> Option<u8> {
        self.target_slot
    }

    fn emit(&self, event: UpdateEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }

    fn goto(&mut self, new: ParserState) {
        debug!(from = %self.state, to = %new, "Parser state");
        self.emit(UpdateEvent::StateChanged {
            from: self.state.to_string(),
            to: new.to_string(),
        });
        self.state = new;
    }

    fn fail(
        &mut self,
        upgrader: &mut dyn Upgrader,
        reason: FailReason,
        detail: impl Into<String>,
    ) -> FeedStatus {
        // Whatever went wrong, the partial image must never become bootable.
        upgrader.abort();
        self.fail_keeping_session(reason, detail)
    }

    /// Terminal failure without touching the upgrader. For failures before
    /// this parser opened a session: a concurrent transfer may own the
    /// upgrader, and a rejected trigger must not cancel it.
    fn fail_keeping_session(
        &mut self,
        reason: FailReason,
        detail: impl Into<String>,
    ) -> FeedStatus {
        self.reason = Some(reason);
        self.goto(ParserState::Error);
        self.emit(UpdateEvent::Failed {
            reason,
            detail: detail.into(),
        });
        FeedStatus::Failed(reason)
    }

    /// Move bytes from `input` into the staging buffer until it holds
    /// `needed` bytes; returns false when the fragment ran dry first.
    fn buffer_upto(&mut self, input: &mut &[u8], needed: usize) -> bool {
        let take = (needed - self.buf.len()).min(input.len());
        self.buf.extend_from_slice(&input[..take]);
        *input = &input[take..];
        self.buf.len() == needed
    }

    /// Push a fragment of the transfer through the state machine.
    ///
    /// Re-entrant across arbitrary fragment boundaries; must not be called
    /// again once a terminal status was returned. Bytes trailing the end of
    /// a completed transfer within the same fragment are ignored.
    pub fn feed(
        &mut self,
        upgrader: &mut dyn Upgrader,
        mut input: &[u8],
    ) -> Result<FeedStatus, ParserError> {
        if matches!(self.state, ParserState::Done | ParserState::Error) {
            return Err(ParserError::AlreadyFinished);
        }

        loop {
            match self.state {
                ParserState::AwaitingHeader => {
                    if !self.buffer_upto(&mut input, ImageHeader::SIZE) {
                        break;
                    }
                    // No session opened yet: failures here must leave the
                    // upgrader alone, a concurrent transfer may own it.
                    let header = match ImageHeader::from_bytes(&self.buf) {
                        Ok(h) => h,
                        Err(e) => {
                            return Ok(
                                self.fail_keeping_session(FailReason::Protocol, e.to_string())
                            );
                        }
                    };
                    self.buf.clear();

                    let Some(target) = upgrader.get_next_boot_partition(None) else {
                        return Ok(self.fail_keeping_session(
                            FailReason::State,
                            "no eligible target slot",
                        ));
                    };
                    if let Err(e) = upgrader.begin(&target, header.total_size) {
                        return Ok(self.fail_keeping_session(reason_of(&e), e.to_string()));
                    }

                    let slot = target.slot().unwrap_or(0);
                    self.emit(UpdateEvent::TransferStarted {
                        total_size: header.total_size,
                        version: header.version,
                        target_slot: slot,
                    });
                    self.target_slot = Some(slot);
                    self.header = Some(header);
                    self.goto(ParserState::AwaitingSegmentHeader);
                }

                ParserState::AwaitingSegmentHeader => {
                    if !self.buffer_upto(&mut input, SegmentHeader::SIZE) {
                        break;
                    }
                    let seg = match SegmentHeader::from_bytes(&self.buf) {
                        Ok(s) => s,
                        Err(e) => {
                            return Ok(self.fail(upgrader, FailReason::Protocol, e.to_string()));
                        }
                    };
                    self.buf.clear();

                    match seg.tag {
                        SEG_DATA => {
                            self.emit(UpdateEvent::SegmentStarted {
                                tag: seg.tag_ascii(),
                                length: seg.length,
                            });
                            self.remaining = seg.length;
                            self.goto(ParserState::CopyingSegmentBody);
                        }
                        SEG_END => {
                            if seg.length != 0 {
                                return Ok(self.fail(
                                    upgrader,
                                    FailReason::Protocol,
                                    "end-of-segments marker with non-zero length",
                                ));
                            }
                            self.goto(ParserState::AwaitingTrailer);
                        }
                        other => {
                            return Ok(self.fail(
                                upgrader,
                                FailReason::Protocol,
                                format!("unknown segment tag 0x{other:08X}"),
                            ));
                        }
                    }
                }

                ParserState::CopyingSegmentBody => {
                    if self.remaining == 0 {
                        self.goto(ParserState::AwaitingSegmentHeader);
                        continue;
                    }
                    if input.is_empty() {
                        break;
                    }
                    let take = (self.remaining as usize).min(input.len());
                    let (chunk, rest) = input.split_at(take);
                    input = rest;

                    let mut staged = Vec::new();
                    if let Err(e) = self.transform.apply(chunk, &mut staged) {
                        return Ok(self.fail(upgrader, FailReason::Protocol, e.to_string()));
                    }

                    let mut off = 0;
                    while off < staged.len() {
                        match upgrader.write(&staged[off..]) {
                            Ok(n) => off += n,
                            Err(e) => {
                                return Ok(self.fail(upgrader, reason_of(&e), e.to_string()));
                            }
                        }
                    }
                    self.written += staged.len() as u64;
                    self.remaining -= take as u32;

                    let total = self.header.map(|h| h.total_size as u64).unwrap_or(0);
                    self.emit(UpdateEvent::Progress {
                        written: self.written,
                        total,
                    });
                    if self.remaining == 0 {
                        self.goto(ParserState::AwaitingSegmentHeader);
                    }
                }

                ParserState::AwaitingTrailer => {
                    let has_trailer = self.header.map(|h| h.has_trailer()).unwrap_or(false);
                    let declared = if has_trailer {
                        if !self.buffer_upto(&mut input, DIGEST_SIZE) {
                            break;
                        }
                        Some(std::mem::take(&mut self.buf))
                    } else {
                        None
                    };

                    match upgrader.end(declared.as_deref()) {
                        Ok(true) => {
                            self.goto(ParserState::Done);
                        }
                        Ok(false) => {
                            return Ok(self.fail(
                                upgrader,
                                FailReason::Integrity,
                                "declared digest does not match payload",
                            ));
                        }
                        Err(e) => {
                            return Ok(self.fail(upgrader, reason_of(&e), e.to_string()));
                        }
                    }
                }

                // Terminal; ignore any bytes trailing the transfer.
                ParserState::Done | ParserState::Error => break,
            }
        }

        Ok(match self.state {
            ParserState::Done => FeedStatus::Done,
            ParserState::Error => FeedStatus::Failed(
                self.reason.unwrap_or(FailReason::Protocol),
            ),
            _ => FeedStatus::InProgress,
        })
    }
}

/// Map an upgrader failure onto the transfer-level reason taxonomy.
fn reason_of(err: &UpgradeError) -> FailReason {
    match err {
        UpgradeError::InvalidPartition(_) | UpgradeError::Overflow { .. } => FailReason::Capacity,
        UpgradeError::SizeMismatch { .. } => FailReason::Protocol,
        UpgradeError::Storage(_) => FailReason::Storage,
        _ => FailReason::State,
    }
}
