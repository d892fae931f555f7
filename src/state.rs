//! Per-thread setup and fixture state.
//!
//! Setup scopes and cached fixtures are mutable bookkeeping that test items
//! touch constantly, so sharing one instance across worker threads would
//! mean tearing down scopes another thread is still inside. The
//! implementations here give every thread its own stack and its own cache
//! behind a shared handle: one [`IsolatedState`] travels through the run,
//! and each worker that uses it sees only its own data.
//!
//! Hosts with their own bookkeeping can implement [`SetupState`] and
//! [`FixtureRegistry`] themselves and install them via
//! [`IsolatedState::with_setup`] and [`IsolatedState::with_fixtures`].

use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    fmt,
    sync::Arc,
};

use thread_local::ThreadLocal;

use crate::env::ShadowEnviron;

/// A cached fixture, type-erased so registries can hold anything.
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

/// Stack of entered setup scopes with teardown finalizers.
///
/// Every operation acts on the calling thread's view of the stack.
pub trait SetupState: Send + Sync {
    /// Open a new scope on top of the stack.
    fn enter(&self, scope: &str);

    /// Attach a finalizer to the innermost open scope.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no open scope.
    fn add_finalizer(&self, finalizer: Box<dyn FnOnce() + Send>);

    /// Close the innermost scope, running its finalizers newest-first.
    ///
    /// Tearing down with no open scope is a no-op.
    fn teardown(&self);

    /// Number of scopes the calling thread has open.
    fn depth(&self) -> usize;

    /// Name of the innermost open scope.
    fn current_scope(&self) -> Option<String>;

    /// Close every open scope, innermost first.
    fn teardown_all(&self) {
        while self.depth() > 0 {
            self.teardown();
        }
    }
}

/// Keyed cache of lazily built fixture values.
///
/// Every operation acts on the calling thread's view of the cache.
pub trait FixtureRegistry: Send + Sync {
    /// Return the cached value for `key`, building and caching it on first
    /// use.
    fn get_or_create(&self, key: &str, build: &dyn Fn() -> FixtureValue) -> FixtureValue;

    /// Drop the cached value for `key`, reporting whether one existed.
    fn invalidate(&self, key: &str) -> bool;

    /// Number of fixtures cached by the calling thread.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every fixture cached by the calling thread.
    fn clear(&self);
}

struct Scope {
    name: String,
    finalizers: Vec<Box<dyn FnOnce() + Send>>,
}

/// [`SetupState`] keeping an independent scope stack per thread.
#[derive(Default)]
pub struct ThreadLocalSetupState {
    stacks: ThreadLocal<RefCell<Vec<Scope>>>,
}

impl ThreadLocalSetupState {
    pub fn new() -> Self {
        Self::default()
    }

    fn stack_cell(&self) -> &RefCell<Vec<Scope>> {
        self.stacks.get_or(|| RefCell::new(Vec::new()))
    }
}

impl SetupState for ThreadLocalSetupState {
    fn enter(&self, scope: &str) {
        self.stack_cell().borrow_mut().push(Scope {
            name: scope.to_string(),
            finalizers: Vec::new(),
        });
    }

    fn add_finalizer(&self, finalizer: Box<dyn FnOnce() + Send>) {
        self.stack_cell()
            .borrow_mut()
            .last_mut()
            .expect("no open setup scope to attach a finalizer to")
            .finalizers
            .push(finalizer);
    }

    fn teardown(&self) {
        // Take the scope out before running anything so finalizers can
        // re-enter the stack without hitting a borrow conflict.
        let scope = self.stack_cell().borrow_mut().pop();
        if let Some(scope) = scope {
            for finalizer in scope.finalizers.into_iter().rev() {
                finalizer();
            }
        }
    }

    fn depth(&self) -> usize {
        self.stacks.get().map_or(0, |cell| cell.borrow().len())
    }

    fn current_scope(&self) -> Option<String> {
        self.stacks
            .get()
            .and_then(|cell| cell.borrow().last().map(|scope| scope.name.clone()))
    }
}

/// [`FixtureRegistry`] keeping an independent cache per thread.
#[derive(Default)]
pub struct ThreadLocalFixtureRegistry {
    slots: ThreadLocal<RefCell<HashMap<String, FixtureValue>>>,
}

impl ThreadLocalFixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_cell(&self) -> &RefCell<HashMap<String, FixtureValue>> {
        self.slots.get_or(|| RefCell::new(HashMap::new()))
    }
}

impl FixtureRegistry for ThreadLocalFixtureRegistry {
    fn get_or_create(&self, key: &str, build: &dyn Fn() -> FixtureValue) -> FixtureValue {
        let cell = self.slot_cell();
        if let Some(value) = cell.borrow().get(key) {
            return Arc::clone(value);
        }
        // The builder runs with the cache unborrowed, so fixtures may build
        // other fixtures.
        let value = build();
        cell.borrow_mut()
            .insert(key.to_string(), Arc::clone(&value));
        value
    }

    fn invalidate(&self, key: &str) -> bool {
        self.slot_cell().borrow_mut().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.slots.get().map_or(0, |cell| cell.borrow().len())
    }

    fn clear(&self) {
        if let Some(cell) = self.slots.get() {
            cell.borrow_mut().clear();
        }
    }
}

/// The mutable state a run hands to its workers.
///
/// Cloning is cheap and yields handles to the same underlying state. The
/// default bundle is fully thread-isolated: per-thread setup stacks,
/// per-thread fixture caches, and a process-seeded [`ShadowEnviron`]
/// shadowing [`CURRENT_TEST_ENV_KEY`](crate::CURRENT_TEST_ENV_KEY).
#[derive(Clone)]
pub struct IsolatedState {
    setup: Arc<dyn SetupState>,
    fixtures: Arc<dyn FixtureRegistry>,
    environ: Arc<ShadowEnviron>,
}

impl IsolatedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setup(mut self, setup: impl SetupState + 'static) -> Self {
        self.setup = Arc::new(setup);
        self
    }

    pub fn with_fixtures(mut self, fixtures: impl FixtureRegistry + 'static) -> Self {
        self.fixtures = Arc::new(fixtures);
        self
    }

    pub fn with_environ(mut self, environ: ShadowEnviron) -> Self {
        self.environ = Arc::new(environ);
        self
    }

    pub fn setup(&self) -> &Arc<dyn SetupState> {
        &self.setup
    }

    pub fn fixtures(&self) -> &Arc<dyn FixtureRegistry> {
        &self.fixtures
    }

    pub fn environ(&self) -> &Arc<ShadowEnviron> {
        &self.environ
    }
}

impl Default for IsolatedState {
    fn default() -> Self {
        Self {
            setup: Arc::new(ThreadLocalSetupState::new()),
            fixtures: Arc::new(ThreadLocalFixtureRegistry::new()),
            environ: Arc::new(ShadowEnviron::current_test()),
        }
    }
}

impl fmt::Debug for IsolatedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedState")
            .field("environ_key", &self.environ.shadowed_key())
            .finish_non_exhaustive()
    }
}
