//! The collected suite and its run-wide controls.

use std::sync::{Arc, OnceLock};

use crate::{
    env::ShadowEnviron,
    errors::ExecError,
    state::{FixtureRegistry, IsolatedState, SetupState},
};

/// How one collected item gets executed.
///
/// The executor receives the item and, when one exists, the item scheduled
/// directly after it. Sequential hosts pass the collection-order successor
/// so executors can tear down only the setup the next item cannot reuse;
/// concurrent dispatch passes `None`, because with items interleaving
/// across threads the successor is not what runs next on this thread.
///
/// Closures of the matching shape implement this directly.
pub trait ItemExecutor<Item> {
    fn execute(&self, item: &Item, next: Option<&Item>) -> Result<(), ExecError>;
}

impl<Item, F> ItemExecutor<Item> for F
where
    F: Fn(&Item, Option<&Item>) -> Result<(), ExecError>,
{
    fn execute(&self, item: &Item, next: Option<&Item>) -> Result<(), ExecError> {
        self(item, next)
    }
}

/// A collected test suite, the outcome of its collection phase, and the
/// switches that steer a run over it.
///
/// The session is shared read-only across worker threads. Its only mutable
/// parts are write-once: the stop reason and the installed [`IsolatedState`].
#[derive(Debug)]
pub struct Session<Item> {
    items: Vec<Item>,
    collection_failures: usize,
    continue_on_collection_errors: bool,
    collect_only: bool,
    stop: OnceLock<String>,
    state: OnceLock<IsolatedState>,
}

impl<Item> Session<Item> {
    /// A session over `items`, collected without failures.
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            collection_failures: 0,
            continue_on_collection_errors: false,
            collect_only: false,
            stop: OnceLock::new(),
            state: OnceLock::new(),
        }
    }

    /// Record how many errors the collection phase produced.
    pub fn with_collection_failures(mut self, failed: usize) -> Self {
        self.collection_failures = failed;
        self
    }

    /// Run the suite even if collection produced errors.
    pub fn with_continue_on_collection_errors(mut self, continue_on: bool) -> Self {
        self.continue_on_collection_errors = continue_on;
        self
    }

    /// Stop after collection without executing anything.
    pub fn with_collect_only(mut self, collect_only: bool) -> Self {
        self.collect_only = collect_only;
        self
    }

    /// Pre-install the run state. A later install attempt is ignored.
    pub fn with_state(self, state: IsolatedState) -> Self {
        let _ = self.state.set(state);
        self
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn collection_failures(&self) -> usize {
        self.collection_failures
    }

    pub fn continue_on_collection_errors(&self) -> bool {
        self.continue_on_collection_errors
    }

    pub fn collect_only(&self) -> bool {
        self.collect_only
    }

    /// Ask the run to wind down. The first reason wins; later calls are
    /// ignored.
    pub fn request_stop(&self, reason: impl Into<String>) {
        let _ = self.stop.set(reason.into());
    }

    pub fn stop_requested(&self) -> Option<&str> {
        self.stop.get().map(String::as_str)
    }

    /// Install the state bundle for this run. The first install wins; the
    /// accessors below fall back to [`IsolatedState::default`] if nothing
    /// was ever installed.
    pub fn install_state(&self, state: IsolatedState) {
        let _ = self.state.set(state);
    }

    pub fn state(&self) -> &IsolatedState {
        self.state.get_or_init(IsolatedState::default)
    }

    pub fn setup_state(&self) -> &Arc<dyn SetupState> {
        self.state().setup()
    }

    pub fn fixtures(&self) -> &Arc<dyn FixtureRegistry> {
        self.state().fixtures()
    }

    pub fn environ(&self) -> &Arc<ShadowEnviron> {
        self.state().environ()
    }

    /// Execute one item through `executor`, then honor a pending stop
    /// request.
    ///
    /// The stop check runs after the item: an item already dequeued when
    /// the stop came in still executes, and its own result is reported as
    /// [`ExecError::Interrupted`] only if it succeeded.
    pub fn run_single(
        &self,
        executor: &impl ItemExecutor<Item>,
        item: &Item,
        next: Option<&Item>,
    ) -> Result<(), ExecError> {
        executor.execute(item, next)?;
        match self.stop_requested() {
            Some(reason) => Err(ExecError::Interrupted(reason.to_string())),
            None => Ok(()),
        }
    }
}
