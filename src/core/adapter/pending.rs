//! Pending exchange slot and cancellable waits
//!
//! The adapter holds at most one outstanding exchange. Issuing a new one
//! replaces the previous exchange, whose waiter then observes
//! [`WaitOutcome::Cancelled`]. Tearing the connection down cancels it too.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Predicate selecting the lines an exchange is interested in
pub type LineFilter = fn(&str) -> bool;

/// Result of a bounded wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The awaited value arrived
    Value(T),
    /// The deadline passed first
    TimedOut,
    /// The exchange was cancelled or superseded
    Cancelled,
}

impl<T> WaitOutcome<T> {
    /// Map the carried value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WaitOutcome<U> {
        match self {
            Self::Value(v) => WaitOutcome::Value(f(v)),
            Self::TimedOut => WaitOutcome::TimedOut,
            Self::Cancelled => WaitOutcome::Cancelled,
        }
    }
}

/// Await `fut` until `deadline`. A future yielding `None` means its source
/// went away, which is reported as [`WaitOutcome::Cancelled`].
pub async fn wait_until<T, F>(deadline: Instant, fut: F) -> WaitOutcome<T>
where
    F: Future<Output = Option<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(Some(value)) => WaitOutcome::Value(value),
        Ok(None) => WaitOutcome::Cancelled,
        Err(_) => WaitOutcome::TimedOut,
    }
}

struct PendingExchange {
    id: u64,
    filter: LineFilter,
    sink: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Inner {
    slot: Mutex<Option<PendingExchange>>,
    next_id: AtomicU64,
}

/// The single correlation slot of an adapter
#[derive(Clone, Default)]
pub struct PendingSlot {
    inner: Arc<Inner>,
}

impl PendingSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new exchange, superseding the current one
    pub fn issue(&self, filter: LineFilter) -> Exchange {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, lines) = mpsc::unbounded_channel();

        let previous = self.inner.slot.lock().replace(PendingExchange { id, filter, sink });
        if let Some(previous) = previous {
            tracing::debug!(id = previous.id, "Pending exchange superseded");
        }

        Exchange {
            id,
            slot: self.clone(),
            lines,
        }
    }

    /// Hand a line to the current exchange if its filter accepts it
    pub fn offer(&self, line: &str) -> bool {
        let slot = self.inner.slot.lock();
        match slot.as_ref() {
            Some(pending) if (pending.filter)(line) => pending.sink.send(line.to_string()).is_ok(),
            _ => false,
        }
    }

    /// Drop the current exchange; its waiter sees `Cancelled`
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.slot.lock().take();
        if let Some(pending) = &cancelled {
            tracing::debug!(id = pending.id, "Pending exchange cancelled");
        }
        cancelled.is_some()
    }

    /// Whether an exchange is outstanding
    pub fn is_pending(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    fn holds(&self, id: u64) -> bool {
        self.inner.slot.lock().as_ref().is_some_and(|p| p.id == id)
    }

    fn release(&self, id: u64) {
        let mut slot = self.inner.slot.lock();
        if slot.as_ref().is_some_and(|p| p.id == id) {
            *slot = None;
        }
    }
}

/// Waiter side of an issued exchange; releases the slot when dropped
pub struct Exchange {
    id: u64,
    slot: PendingSlot,
    lines: mpsc::UnboundedReceiver<String>,
}

impl Exchange {
    /// Next matching line before `deadline`.
    ///
    /// Lines buffered before a cancellation are discarded, so a cancelled
    /// exchange never resolves.
    pub async fn recv_until(&mut self, deadline: Instant) -> WaitOutcome<String> {
        match wait_until(deadline, self.lines.recv()).await {
            WaitOutcome::Value(_) if !self.slot.holds(self.id) => WaitOutcome::Cancelled,
            outcome => outcome,
        }
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}
