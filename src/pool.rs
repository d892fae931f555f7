//! The threaded run loop.
//!
//! A run fans a session's items out over a fixed pool of worker threads.
//! The whole suite is enqueued up front, one stop signal per worker behind
//! it, and only then do the workers start. The coordinating thread waits for
//! the queue to drain, gives each worker a bounded window to wind down, and
//! folds everything the workers reported into a single result.

use std::{fmt, sync::Arc, time::Duration};

use crossbeam_channel::unbounded;
use tracing::{debug, info, warn};

use crate::{
    config::WorkerCount,
    errors::{FailureRecord, RunLoopError},
    queue::WorkQueue,
    session::{ItemExecutor, Session},
    state::IsolatedState,
    worker::{Worker, panic_message},
};

/// How long a worker waits on the queue before rechecking for a drain.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long the coordinator waits for each worker to wind down.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs sessions over a pool of worker threads.
///
/// The runner owns the executor and the run-wide [`IsolatedState`]; both are
/// shared with every worker it spawns. One runner can serve any number of
/// consecutive runs.
pub struct ThreadedRunner<Exec> {
    executor: Arc<Exec>,
    workers: WorkerCount,
    poll_interval: Duration,
    join_timeout: Duration,
    state: IsolatedState,
}

impl<Exec> ThreadedRunner<Exec> {
    pub fn new(executor: Exec) -> Self {
        Self {
            executor: Arc::new(executor),
            workers: WorkerCount::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            state: IsolatedState::default(),
        }
    }

    pub fn with_workers(mut self, workers: impl Into<WorkerCount>) -> Self {
        self.workers = workers.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn with_state(mut self, state: IsolatedState) -> Self {
        self.state = state;
        self
    }

    /// Run the whole session to completion.
    ///
    /// Fails up front if collection failed and the session does not ask to
    /// continue anyway. A collect-only session succeeds without executing
    /// anything. Otherwise every collected item is executed exactly once,
    /// and all recorded failures come back in one
    /// [`RunLoopError::Aggregate`].
    pub fn run<Item>(&self, session: Arc<Session<Item>>) -> Result<(), RunLoopError>
    where
        Item: Send + Sync + 'static,
        Exec: ItemExecutor<Item> + Send + Sync + 'static,
    {
        if session.collection_failures() > 0 && !session.continue_on_collection_errors() {
            return Err(RunLoopError::Collection {
                failed: session.collection_failures(),
            });
        }
        if session.collect_only() {
            info!(items = session.len(), "collect-only session, nothing to run");
            return Ok(());
        }

        session.install_state(self.state.clone());

        let workers = self.workers.resolve().get();
        info!(items = session.len(), workers, "starting threaded run");

        // The full suite goes in before any worker starts, with one stop
        // signal per worker queued behind it.
        let queue = Arc::new(WorkQueue::new());
        for index in 0..session.len() {
            queue.push_index(index);
        }
        for _ in 0..workers {
            queue.push_stop();
        }

        let (failure_tx, failure_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker = Worker {
                name: format!("testloom-worker-{index}"),
                queue: Arc::clone(&queue),
                session: Arc::clone(&session),
                executor: Arc::clone(&self.executor),
                failures: failure_tx.clone(),
                done: done_tx.clone(),
                poll_interval: self.poll_interval,
            };
            handles.push(worker.spawn()?);
        }
        // Workers hold the only remaining senders.
        drop(failure_tx);
        drop(done_tx);

        queue.wait_drained();
        debug!("queue drained, winding workers down");

        for _ in &handles {
            match done_rx.recv_timeout(self.join_timeout) {
                Ok(worker) => debug!(%worker, "worker finished"),
                Err(_) => break,
            }
        }
        for handle in handles {
            match handle.is_finished() {
                true => {
                    if let Err(payload) = handle.join() {
                        warn!(message = %panic_message(payload), "worker thread panicked");
                    }
                }
                // Dropping the handle leaves the thread to finish on its own.
                false => warn!(
                    worker = handle.thread().name().unwrap_or("?"),
                    "worker still busy after the join timeout, leaving it behind"
                ),
            }
        }

        let records: Vec<FailureRecord> = failure_rx.try_iter().collect();
        match records.is_empty() {
            true => {
                info!(items = session.len(), "threaded run finished cleanly");
                Ok(())
            }
            false => {
                debug!(failures = records.len(), "threaded run finished with failures");
                Err(RunLoopError::Aggregate { records })
            }
        }
    }
}

impl<Exec> fmt::Debug for ThreadedRunner<Exec> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedRunner")
            .field("workers", &self.workers)
            .field("poll_interval", &self.poll_interval)
            .field("join_timeout", &self.join_timeout)
            .finish_non_exhaustive()
    }
}

/// Run `session` over `workers` threads with the given executor.
///
/// Convenience wrapper over [`ThreadedRunner`] with default timing.
pub fn run_test_loop<Item, Exec>(
    session: Arc<Session<Item>>,
    executor: Exec,
    workers: WorkerCount,
) -> Result<(), RunLoopError>
where
    Item: Send + Sync + 'static,
    Exec: ItemExecutor<Item> + Send + Sync + 'static,
{
    ThreadedRunner::new(executor).with_workers(workers).run(session)
}
