//! The work queue the pool fills and the workers drain.
//!
//! The queue is an unbounded FIFO of item indices plus per-worker stop
//! markers, paired with a pending counter. The counter, not the channel
//! length, defines "drained": an index popped by one worker still counts as
//! pending until that worker marks it done, so a sibling that momentarily
//! sees an empty channel does not mistake in-flight work for completion.

use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

/// An entry on the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// Index into the session's finalized item list.
    Index(usize),
    /// Orderly-shutdown marker; one is queued per worker, after all indices.
    Stop,
}

/// Why a timed dequeue returned no work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DequeueError {
    /// Nothing arrived within the poll interval. Work may still be in
    /// flight on other workers.
    #[error("no work arrived within the poll interval")]
    TimedOut,
    /// The queue channel is gone. Unreachable while the queue is alive,
    /// since the queue holds both channel ends; workers treat it as an
    /// unexpected dequeue failure.
    #[error("work queue is closed")]
    Closed,
}

/// Thread-safe FIFO with a timed blocking pop and a drain wait.
///
/// All operations take `&self` and are safe for concurrent callers.
pub struct WorkQueue {
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
    pending: Mutex<usize>,
    drained: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            pending: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Queue one item index. Never blocks.
    pub fn push_index(&self, index: usize) {
        let mut pending = self.lock_pending();
        *pending += 1;
        self.tx
            .send(WorkItem::Index(index))
            .expect("queue holds its own receiver");
    }

    /// Queue one stop marker. Never blocks and never counts as pending work.
    pub fn push_stop(&self) {
        self.tx
            .send(WorkItem::Stop)
            .expect("queue holds its own receiver");
    }

    /// Dequeue the next item, blocking up to `timeout`.
    pub fn pop(&self, timeout: Duration) -> Result<WorkItem, DequeueError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => DequeueError::TimedOut,
            RecvTimeoutError::Disconnected => DequeueError::Closed,
        })
    }

    /// Mark one previously dequeued index as completed.
    ///
    /// Called exactly once per dequeued [`WorkItem::Index`] — never for stop
    /// markers, never for timeouts.
    pub fn mark_done(&self) {
        let mut pending = self.lock_pending();
        *pending = pending
            .checked_sub(1)
            .expect("mark_done called without a matching dequeued index");
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Whether every queued index has been marked done.
    pub fn is_drained(&self) -> bool {
        *self.lock_pending() == 0
    }

    /// Block until every queued index has been marked done.
    pub fn wait_drained(&self) {
        let mut pending = self.lock_pending();
        while *pending > 0 {
            pending = self
                .drained
                .wait(pending)
                .expect("work queue lock poisoned");
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, usize> {
        self.pending.lock().expect("work queue lock poisoned")
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
