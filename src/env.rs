//! Environment table stand-in with one thread-private key.
//!
//! Concurrent test items all want to publish "the test currently running
//! here" under the same well-known environment key, and they all expect to
//! own that key exclusively. [`ShadowEnviron`] keeps that illusion alive: the
//! one designated key lives in a per-thread slot, every other key lives in a
//! genuinely shared table with normal cross-thread visibility. The apparent
//! contents of the mapping therefore differ per observing thread — by
//! exactly one key.
//!
//! The shared table is owned by the store and seeded from the process
//! environment at construction. Mutating the process environment itself from
//! multiple threads is undefined behavior on POSIX (`std::env::set_var` is
//! `unsafe` for that reason), which is exactly the hazard this store exists
//! to absorb.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    env,
    ffi::{OsStr, OsString},
    sync::{Arc, Mutex, MutexGuard},
};

use thread_local::ThreadLocal;

/// Default designated key: the per-thread "current test" marker.
pub const CURRENT_TEST_ENV_KEY: &str = "TESTLOOM_CURRENT_TEST";

type SharedTable = BTreeMap<OsString, OsString>;

/// An environment mapping in which exactly one key is thread-local.
///
/// Reads, writes, removals and containment checks on the designated key act
/// on a slot private to the calling thread; the key never exists in the
/// shared table at all. Every other key passes through to the shared table,
/// where mutations are visible to all threads. Keys are accepted in the
/// table's native encoding (`OsStr`), so both `str` and `OsString` callers
/// hit the same entries.
pub struct ShadowEnviron {
    shadowed: OsString,
    shared: Arc<Mutex<SharedTable>>,
    slot: ThreadLocal<RefCell<Option<OsString>>>,
}

impl ShadowEnviron {
    /// Build a store seeded from the current process environment.
    ///
    /// If the process environment already carries the designated key, the
    /// entry is dropped from the seed: the designated key must never exist
    /// in the shared table.
    pub fn new(shadowed: impl Into<OsString>) -> Self {
        Self::with_vars(shadowed, env::vars_os())
    }

    /// Build a store seeded from an explicit set of variables.
    pub fn with_vars(
        shadowed: impl Into<OsString>,
        vars: impl IntoIterator<Item = (OsString, OsString)>,
    ) -> Self {
        let shadowed = shadowed.into();
        let table: SharedTable = vars
            .into_iter()
            .filter(|(key, _)| *key != shadowed)
            .collect();
        Self {
            shadowed,
            shared: Arc::new(Mutex::new(table)),
            slot: ThreadLocal::new(),
        }
    }

    /// Build a process-seeded store shadowing [`CURRENT_TEST_ENV_KEY`].
    pub fn current_test() -> Self {
        Self::new(CURRENT_TEST_ENV_KEY)
    }

    /// The designated thread-local key.
    pub fn shadowed_key(&self) -> &OsStr {
        &self.shadowed
    }

    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<OsString> {
        match self.is_shadowed(key.as_ref()) {
            true => self.slot_value(),
            false => self.lock_shared().get(key.as_ref()).cloned(),
        }
    }

    pub fn set(&self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) {
        let value = value.as_ref().to_os_string();
        match self.is_shadowed(key.as_ref()) {
            true => *self.slot_cell().borrow_mut() = Some(value),
            false => {
                self.lock_shared()
                    .insert(key.as_ref().to_os_string(), value);
            }
        }
    }

    /// Remove a key, returning the removed value if it was present.
    ///
    /// Removing the designated key only clears the calling thread's slot;
    /// other threads keep their values.
    pub fn remove(&self, key: impl AsRef<OsStr>) -> Option<OsString> {
        match self.is_shadowed(key.as_ref()) {
            true => self.slot.get().and_then(|cell| cell.borrow_mut().take()),
            false => self.lock_shared().remove(key.as_ref()),
        }
    }

    pub fn contains(&self, key: impl AsRef<OsStr>) -> bool {
        match self.is_shadowed(key.as_ref()) {
            true => self.has_slot(),
            false => self.lock_shared().contains_key(key.as_ref()),
        }
    }

    /// All visible variables, from the calling thread's point of view.
    ///
    /// The designated key is reported last, and only if the calling thread
    /// has set it.
    pub fn vars(&self) -> Vec<(OsString, OsString)> {
        let mut vars: Vec<_> = self
            .lock_shared()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(value) = self.slot_value() {
            vars.push((self.shadowed.clone(), value));
        }
        vars
    }

    /// Apparent size of the mapping for the calling thread.
    pub fn len(&self) -> usize {
        self.lock_shared().len() + usize::from(self.has_slot())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the store: the shared table keeps its identity (writes through
    /// either store are visible in both), while the calling thread's slot
    /// value is deep-copied into a fresh slot. Mutating the copy's slot
    /// never affects the source's.
    pub fn snapshot(&self) -> Self {
        let copy = Self {
            shadowed: self.shadowed.clone(),
            shared: Arc::clone(&self.shared),
            slot: ThreadLocal::new(),
        };
        if let Some(value) = self.slot_value() {
            *copy.slot_cell().borrow_mut() = Some(value);
        }
        copy
    }

    fn is_shadowed(&self, key: &OsStr) -> bool {
        key == self.shadowed.as_os_str()
    }

    fn slot_cell(&self) -> &RefCell<Option<OsString>> {
        self.slot.get_or(|| RefCell::new(None))
    }

    fn slot_value(&self) -> Option<OsString> {
        self.slot.get().and_then(|cell| cell.borrow().clone())
    }

    fn has_slot(&self) -> bool {
        self.slot
            .get()
            .is_some_and(|cell| cell.borrow().is_some())
    }

    fn lock_shared(&self) -> MutexGuard<'_, SharedTable> {
        self.shared.lock().expect("environment table lock poisoned")
    }
}

impl Default for ShadowEnviron {
    fn default() -> Self {
        Self::current_test()
    }
}
