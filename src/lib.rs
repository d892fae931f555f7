//! Weave a collected test suite across a pool of worker threads.
//!
//! A [`Session`] holds the collected items, a [`ThreadedRunner`] fans them
//! out over worker threads through a drain-aware [`WorkQueue`], and the
//! shared mutable state every test framework drags along lives behind
//! [`IsolatedState`], isolated per thread.

mod config;
pub use config::*;

mod env;
pub use env::*;

mod errors;
pub use errors::*;

mod pool;
pub use pool::*;

mod queue;
pub use queue::*;

mod session;
pub use session::*;

mod state;
pub use state::*;

mod worker;

#[cfg(test)]
mod test_support;
