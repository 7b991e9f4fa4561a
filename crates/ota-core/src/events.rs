//! Event system for UI decoupling.
//!
//! Lets a CLI or supervisor observe transfer progress without tight
//! coupling to the engine. Exactly one terminal event (`Completed` or
//! `Failed`) is emitted per transfer.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Reason code carried by the terminal failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// Malformed header or segment framing.
    Protocol,
    /// Declared size exceeds the target partition capacity.
    Capacity,
    /// Digest mismatch after all bytes were written.
    Integrity,
    /// API misuse (feed after a terminal state, begin while busy).
    State,
    /// Underlying medium write/erase failure.
    Storage,
    /// Transport stopped delivering before the transfer finished.
    Transport,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Protocol => write!(f, "protocol error"),
            FailReason::Capacity => write!(f, "capacity exceeded"),
            FailReason::Integrity => write!(f, "integrity check failed"),
            FailReason::State => write!(f, "state error"),
            FailReason::Storage => write!(f, "storage error"),
            FailReason::Transport => write!(f, "transport interrupted"),
        }
    }
}

/// Events emitted over the course of one firmware transfer.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// Header decoded, session opened on a target slot.
    TransferStarted {
        total_size: u32,
        version: u16,
        target_slot: u8,
    },
    /// A payload segment header was decoded.
    SegmentStarted { tag: String, length: u32 },
    /// Bytes written so far out of the declared total.
    Progress { written: u64, total: u64 },
    /// Parser state transition.
    StateChanged { from: String, to: String },
    /// Transfer committed; `slot` boots after next restart.
    Completed { slot: u8 },
    /// Transfer failed; the previous boot slot is untouched.
    Failed { reason: FailReason, detail: String },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving transfer events.
pub trait UpdateObserver: Send + Sync {
    fn on_event(&self, event: &UpdateEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpdateObserver for TracingObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::TransferStarted {
                total_size,
                version,
                target_slot,
            } => {
                tracing::info!(size = total_size, version, slot = target_slot, "Transfer started");
            }
            UpdateEvent::SegmentStarted { tag, length } => {
                tracing::debug!(tag = %tag, length, "Segment started");
            }
            UpdateEvent::Progress { written, total } => {
                let pct = if *total > 0 { written * 100 / total } else { 0 };
                tracing::debug!(written, total, progress = %format!("{pct}%"), "Progress");
            }
            UpdateEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Parser state");
            }
            UpdateEvent::Completed { slot } => {
                tracing::info!(slot, "Transfer complete");
            }
            UpdateEvent::Failed { reason, detail } => {
                tracing::error!(reason = %reason, "Transfer failed: {detail}");
            }
            UpdateEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
        }
    }
}

/// Whether dispatch proceeds to the next handler in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

type Handler = Box<dyn Fn(&UpdateEvent) -> Flow + Send + Sync>;

/// Priority-ordered handler list.
///
/// Handlers run lowest priority value first; a `Flow::Stop` result ends
/// dispatch for that event. Ties preserve registration order.
pub struct HandlerChain {
    handlers: Vec<(i32, Handler)>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn add_handler<H>(&mut self, priority: i32, handler: H)
    where
        H: Fn(&UpdateEvent) -> Flow + Send + Sync + 'static,
    {
        let at = self
            .handlers
            .iter()
            .position(|(p, _)| *p > priority)
            .unwrap_or(self.handlers.len());
        self.handlers.insert(at, (priority, Box::new(handler)));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateObserver for HandlerChain {
    fn on_event(&self, event: &UpdateEvent) {
        for (_, handler) in &self.handlers {
            if handler(event) == Flow::Stop {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_chain_runs_in_priority_order() {
        let order = std::sync::Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();

        for (prio, label) in [(10, "late"), (0, "early"), (5, "mid")] {
            let order = order.clone();
            chain.add_handler(prio, move |_| {
                order.lock().unwrap().push(label);
                Flow::Continue
            });
        }

        chain.on_event(&UpdateEvent::Completed { slot: 1 });
        assert_eq!(*order.lock().unwrap(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_stop_halts_dispatch() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let mut chain = HandlerChain::new();

        {
            let calls = calls.clone();
            chain.add_handler(0, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Flow::Stop
            });
        }
        {
            let calls = calls.clone();
            chain.add_handler(1, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Flow::Continue
            });
        }

        chain.on_event(&UpdateEvent::Completed { slot: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
