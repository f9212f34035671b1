//! Scheduler-aware synchronization primitives.

mod mutex;

pub use mutex::{Mutex, MutexGuard};
