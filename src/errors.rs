use std::{fmt, io};

use thiserror::Error;

use crate::queue::DequeueError;

/// Failure reported by the execution entry point for a single test item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ExecError {
    /// The item ran and reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The session asked the run to stop while this item was executing.
    #[error("interrupted: {0}")]
    Interrupted(String),
}

impl ExecError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<String> for ExecError {
    fn from(value: String) -> Self {
        Self::Failed(value)
    }
}

impl From<&str> for ExecError {
    fn from(value: &str) -> Self {
        Self::Failed(value.into())
    }
}

/// Anything a worker can fail on while processing one dequeued index.
///
/// Execution errors and panics leave the worker running; a queue failure
/// terminates it early. All of them end up in the aggregate report, never as
/// individual top-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum WorkerFailure {
    /// The execution entry point returned an error.
    #[error("{0}")]
    Exec(#[from] ExecError),
    /// The execution entry point panicked.
    #[error("panicked: {0}")]
    Panicked(String),
    /// The work queue failed outside the normal timeout path.
    #[error("work queue failed: {0}")]
    Queue(DequeueError),
}

/// One `(worker, failure)` pair, preserved verbatim for the aggregate report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Thread name of the worker that recorded the failure.
    pub worker: String,
    pub failure: WorkerFailure,
}

impl FailureRecord {
    pub fn new(worker: impl Into<String>, failure: WorkerFailure) -> Self {
        Self {
            worker: worker.into(),
            failure,
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.worker, self.failure)
    }
}

/// Terminal error of a threaded run.
///
/// A run either succeeds, refuses to start ([`RunLoopError::Collection`],
/// [`RunLoopError::Spawn`]) or finishes with every worker failure folded into
/// one [`RunLoopError::Aggregate`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunLoopError {
    /// Collection already failed and the session is not configured to
    /// continue past collection errors. Raised before any worker exists.
    #[error("{failed} error{} during collection", plural(.failed))]
    Collection { failed: usize },
    /// An OS worker thread could not be created.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    /// At least one worker recorded a failure. The message lists every
    /// record as a `worker: failure` line, in drain order.
    #[error("errors occurred:\n{}", list(.records))]
    Aggregate { records: Vec<FailureRecord> },
}

fn plural(n: &usize) -> &'static str {
    match *n == 1 {
        true => "",
        false => "s",
    }
}

fn list(records: &[FailureRecord]) -> String {
    records
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
