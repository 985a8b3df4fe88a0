//! Concurrency control: page-level shared/exclusive locks held until the
//! owning transaction completes, with wait-for graph deadlock detection.

pub mod lock;

pub use lock::{LockError, LockManager, LockMode};
