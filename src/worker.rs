//! The per-thread consumer loop.

use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::{
    errors::{FailureRecord, WorkerFailure},
    queue::{DequeueError, WorkItem, WorkQueue},
    session::{ItemExecutor, Session},
};

/// One worker: polls the queue, executes items, reports failures.
///
/// Every dequeued index is marked done on the queue no matter how its
/// execution went, including by panic. Skipping that mark would leave the
/// pending count above zero forever and stall the whole run.
pub(crate) struct Worker<Item, Exec> {
    pub(crate) name: String,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) session: Arc<Session<Item>>,
    pub(crate) executor: Arc<Exec>,
    pub(crate) failures: Sender<FailureRecord>,
    pub(crate) done: Sender<String>,
    pub(crate) poll_interval: Duration,
}

impl<Item, Exec> Worker<Item, Exec>
where
    Item: Send + Sync + 'static,
    Exec: ItemExecutor<Item> + Send + Sync + 'static,
{
    /// Start the loop on a named OS thread.
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!(worker = %self.name, "worker online");
        loop {
            match self.queue.pop(self.poll_interval) {
                Ok(WorkItem::Stop) => {
                    debug!(worker = %self.name, "stop signal received");
                    break;
                }
                Ok(WorkItem::Index(index)) => {
                    if let Err(failure) = self.run_index(index) {
                        debug!(worker = %self.name, index, %failure, "item failed");
                        // Receiver gone means nobody is listening anymore.
                        let _ = self.failures.send(FailureRecord::new(&self.name, failure));
                    }
                    self.queue.mark_done();
                }
                Err(DequeueError::TimedOut) => match self.queue.is_drained() {
                    true => {
                        debug!(worker = %self.name, "queue drained, no stop signal seen");
                        break;
                    }
                    false => continue,
                },
                Err(error @ DequeueError::Closed) => {
                    let _ = self
                        .failures
                        .send(FailureRecord::new(&self.name, WorkerFailure::Queue(error)));
                    break;
                }
            }
        }
        debug!(worker = %self.name, "worker exiting");
        let _ = self.done.send(self.name);
    }

    fn run_index(&self, index: usize) -> Result<(), WorkerFailure> {
        // No follow-up item under concurrent dispatch: the collection-order
        // successor is not what runs next on this thread.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let item = &self.session.items()[index];
            self.session.run_single(self.executor.as_ref(), item, None)
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(WorkerFailure::Exec(error)),
            Err(payload) => Err(WorkerFailure::Panicked(panic_message(payload))),
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<&'static str>() {
        Ok(message) => (*message).to_string(),
        Err(payload) => match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(_) => String::from("non-string panic payload"),
        },
    }
}
