//! Concurrency control module.
//!
//! Page-granularity shared/exclusive locking under strict two-phase locking,
//! with wait-for graph deadlock detection.

pub mod lock;

pub use lock::{LockManager, LockMode, Permission};
