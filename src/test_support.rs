use std::sync::{Arc, Mutex};

use crate::{
    errors::ExecError,
    session::ItemExecutor,
};

/// A suite of `len` items, one `u32` per collected case.
pub(crate) fn suite(len: usize) -> Vec<u32> {
    (0..len as u32).collect()
}

/// Executor that records every item it ran, in execution order.
///
/// Items listed in `fail_on` fail, items in `panic_on` panic. Clones share
/// the record, so tests can keep one handle and hand the other to a runner.
#[derive(Clone, Default)]
pub(crate) struct RecordingExecutor {
    executed: Arc<Mutex<Vec<u32>>>,
    fail_on: Vec<u32>,
    panic_on: Vec<u32>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(items: impl IntoIterator<Item = u32>) -> Self {
        Self {
            fail_on: items.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn panicking_on(items: impl IntoIterator<Item = u32>) -> Self {
        Self {
            panic_on: items.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn executed(&self) -> Vec<u32> {
        self.executed.lock().unwrap().clone()
    }
}

impl ItemExecutor<u32> for RecordingExecutor {
    fn execute(&self, item: &u32, _next: Option<&u32>) -> Result<(), ExecError> {
        self.executed.lock().unwrap().push(*item);
        if self.panic_on.contains(item) {
            panic!("item {item} exploded");
        }
        match self.fail_on.contains(item) {
            true => Err(ExecError::failed(format!("item {item} failed"))),
            false => Ok(()),
        }
    }
}

macro_rules! nonzero {
    (0) => {
        compile_error!("0 is zero")
    };

    ($value:literal) => {
        std::convert::TryFrom::try_from($value).unwrap()
    };
}

pub(crate) use nonzero;
