//! Run configuration values.

use std::{fmt, num::NonZeroUsize, str::FromStr, thread};

use thiserror::Error;

/// Number of worker threads to run, either fixed or matched to the host.
///
/// Parses from the usual setting syntax: the literal `"auto"` or a positive
/// integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerCount {
    /// One worker per available CPU.
    #[default]
    Auto,
    /// Exactly this many workers.
    Fixed(NonZeroUsize),
}

impl WorkerCount {
    /// Resolve to a concrete thread count.
    ///
    /// `Auto` asks the host for its available parallelism and falls back to
    /// a single worker when that cannot be determined.
    pub fn resolve(self) -> NonZeroUsize {
        match self {
            Self::Auto => thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            Self::Fixed(count) => count,
        }
    }
}

impl From<NonZeroUsize> for WorkerCount {
    fn from(count: NonZeroUsize) -> Self {
        Self::Fixed(count)
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(count) => write!(f, "{count}"),
        }
    }
}

/// Failure to parse a worker-count setting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid worker count {input:?}: expected \"auto\" or a positive integer")]
pub struct ParseWorkerCountError {
    input: String,
}

impl FromStr for WorkerCount {
    type Err = ParseWorkerCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            _ => s
                .parse::<NonZeroUsize>()
                .map(Self::Fixed)
                .map_err(|_| ParseWorkerCountError {
                    input: s.to_string(),
                }),
        }
    }
}
