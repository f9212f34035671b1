//! Interlace is a systematic concurrency testing runtime for message-passing
//! Rust programs.
//!
//! A test runs the program under a deterministic cooperative scheduler that
//! interposes on task spawning, awaiting, yielding, synchronization, and
//! nondeterministic choices. At every declared scheduling point a pluggable
//! strategy picks which operation runs next; exploring many schedules
//! surfaces scheduling-dependent bugs (assertion failures, deadlocks,
//! liveness violations), and every failing iteration comes with a schedule
//! trace that replays the bug deterministically.
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let report = interlace::verify(
//!     interlace::Config::builder()
//!         .with_iterations(200)
//!         .with_random_seed(0)
//!         .build(),
//!     || {
//!         let x = Arc::new(AtomicUsize::new(0));
//!         let x1 = Arc::clone(&x);
//!         let x2 = Arc::clone(&x);
//!         let a = interlace::spawn(move || x1.store(3, Ordering::SeqCst));
//!         let b = interlace::spawn(move || {
//!             x2.store(5, Ordering::SeqCst);
//!             interlace::assert!(x2.load(Ordering::SeqCst) == 5, "lost update");
//!         });
//!         interlace::join_all(&[a, b]);
//!     },
//! );
//! assert!(report.found_bug());
//! ```

pub mod actor;
mod config;
mod engine;
mod error;
pub mod future;
mod monitor;
mod nondet;
mod report;
pub mod rt;
mod runtime;
mod schedule;
mod strategy;
pub mod sync;

pub use config::{Config, ConfigBuilder, ReplaySource, StrategyKind};
pub use engine::verify;
pub use error::{BugKind, ExecutionCanceled, Failure, ScheduleError};
pub use monitor::Monitor;
pub use nondet::{nondet, nondet_u16, nondet_u32, nondet_u64, nondet_u8, nondet_usize, Nondet};
pub use report::{BugReport, TestReport};
pub use runtime::operation::{OperationId, OperationStatus};
pub use runtime::{delay, join_all, join_any, spawn, spawn_named, yield_now, SchedulePoint};
pub use schedule::{Schedule, ScheduleHeader, ScheduleStep};
pub use strategy::{
    LivenessStrategy, PctStrategy, ProbabilisticStrategy, RandomStrategy, ReplayStrategy, Strategy,
};

/// Wraps a test function so its body runs under [`verify`] with the default
/// configuration; the test fails if a bug is found.
pub use interlace_macros::test;

/// Assert a condition inside a program under test. A false condition is
/// recorded as an assertion-failure bug (with the formatted message), the
/// failing iteration's trace is persisted, and the iteration stops.
#[macro_export]
macro_rules! assert {
    ($cond:expr $(,)?) => {{
        if !$cond {
            $crate::rt::notify_assertion_failure(::std::format!(
                "assertion failed: {}",
                ::std::stringify!($cond)
            ));
        }
    }};
    ($cond:expr, $($arg:tt)+) => {{
        if !$cond {
            $crate::rt::notify_assertion_failure(::std::format!($($arg)+));
        }
    }};
}
