//! FIFO queue of diffs waiting to be pushed to try.
//!
//! The queue is an unbounded tokio channel plus a pending counter. Every
//! entry sent increments the counter; the consumer decrements it with
//! [`DiffReceiver::task_done`] once the entry has been fully handled.
//! [`DiffSender::join`] resolves when the counter drops back to zero.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};

use crate::types::{Diff, InvalidDiff, Phid};

/// Errors when enqueuing a diff.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The line is not a JSON queue entry.
    #[error("malformed queue entry: {0}")]
    Malformed(String),

    /// The diff payload is unusable.
    #[error(transparent)]
    InvalidDiff(#[from] InvalidDiff),

    /// The consumer is gone.
    #[error("diff queue is closed")]
    Closed,
}

/// A diff to process, with the build target it was triggered for.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub build_target: Option<Phid>,
    pub diff: Diff,
}

#[derive(Deserialize)]
struct WireEntry {
    #[serde(default)]
    build_target: Option<String>,
    diff: Value,
}

impl QueueEntry {
    pub fn new(build_target: Option<Phid>, diff: Diff) -> Self {
        QueueEntry { build_target, diff }
    }

    /// Validates a raw `(build_target, diff)` pair.
    ///
    /// A blank build target is treated as absent.
    pub fn from_parts(build_target: Option<String>, diff: Value) -> Result<Self, QueueError> {
        let build_target = build_target
            .filter(|t| !t.trim().is_empty())
            .map(Phid::from);
        Ok(QueueEntry {
            build_target,
            diff: Diff::from_value(diff)?,
        })
    }

    /// Parses `{"build_target": string|null, "diff": {"phid": ..., ...}}`.
    pub fn from_json_line(line: &str) -> Result<Self, QueueError> {
        let wire: WireEntry =
            serde_json::from_str(line).map_err(|e| QueueError::Malformed(e.to_string()))?;
        Self::from_parts(wire.build_target, wire.diff)
    }

    /// The build target, or the diff phid when there is none.
    pub fn target(&self) -> &Phid {
        self.build_target.as_ref().unwrap_or(&self.diff.phid)
    }
}

#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

/// Creates a connected sender/receiver pair.
pub fn diff_queue() -> (DiffSender, DiffReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(Pending::default());
    (
        DiffSender {
            tx,
            pending: Arc::clone(&pending),
        },
        DiffReceiver { rx, pending },
    )
}

/// Producer half of the diff queue.
#[derive(Debug, Clone)]
pub struct DiffSender {
    tx: mpsc::UnboundedSender<QueueEntry>,
    pending: Arc<Pending>,
}

impl DiffSender {
    pub fn send(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.pending.count.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(entry).is_err() {
            self.pending.count.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Validates and enqueues a raw pair.
    #[cfg(test)]
    pub(crate) fn send_raw(&self, build_target: Option<String>, diff: Value) -> Result<(), QueueError> {
        self.send(QueueEntry::from_parts(build_target, diff)?)
    }

    /// Number of entries sent but not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Waits until every entry sent so far has been acknowledged.
    pub async fn join(&self) {
        loop {
            let mut drained = pin!(self.pending.drained.notified());
            // Register before checking so a wakeup between the two is not lost
            drained.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Consumer half of the diff queue.
#[derive(Debug)]
pub struct DiffReceiver {
    rx: mpsc::UnboundedReceiver<QueueEntry>,
    pending: Arc<Pending>,
}

impl DiffReceiver {
    /// Waits for the next entry. Returns `None` once every sender is dropped
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<QueueEntry> {
        self.rx.recv().await
    }

    /// Acknowledges one received entry.
    pub fn task_done(&self) {
        let previous = self
            .pending
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.pending.drained.notify_waiters();
        }
    }
}
