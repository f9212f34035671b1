//! Panic-hook management and failure persistence.

use crate::config::Config;
use crate::error::Interrupt;
use crate::runtime::execution::ExecutionState;
use crate::schedule::Schedule;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use std::sync::Arc;

/// Install the runtime's panic hook for the duration of a run; the guard
/// restores the previous hook on drop.
///
/// Panics raised inside operations are caught by the step loop and turned
/// into recorded bugs, so while an execution is live on the panicking
/// thread the default stderr spew is suppressed in favor of the structured
/// report. Panics anywhere else fall through to the previous hook.
pub(crate) fn init_panic_hook() -> PanicHookGuard {
    let previous: Arc<dyn Fn(&PanicHookInfo<'_>) + Send + Sync> = Arc::from(panic::take_hook());
    let saved = Arc::clone(&previous);

    panic::set_hook(Box::new(move |info| {
        if info.payload().downcast_ref::<Interrupt>().is_some() {
            // Controlled teardown of an operation; not an error at all.
            return;
        }
        let in_execution = ExecutionState::try_with(|_| ()).is_some();
        if in_execution {
            log::debug!("operation panicked (will be recorded as a bug): {info}");
        } else {
            previous(info);
        }
    }));

    PanicHookGuard { previous: saved }
}

pub(crate) struct PanicHookGuard {
    previous: Arc<dyn Fn(&PanicHookInfo<'_>) + Send + Sync>,
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        let previous = Arc::clone(&self.previous);
        panic::set_hook(Box::new(move |info| previous(info)));
    }
}

/// Best-effort extraction of a panic payload's message.
///
/// Because this may run inside a panic hook, it must not panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Write the failed iteration's schedule trace to disk so the bug can be
/// replayed. Returns the path on success.
pub(crate) fn persist_schedule(
    schedule: &Schedule,
    config: &Config,
    iteration: u64,
) -> Option<PathBuf> {
    let path = config.trace_file.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!(
            "interlace-{}-{iteration}.trace",
            std::process::id()
        ))
    });
    match schedule.write_to(&path) {
        Ok(()) => {
            log::info!(
                "schedule trace persisted to {}; replay it with StrategyKind::replay_file",
                path.display()
            );
            Some(path)
        }
        Err(e) => {
            log::warn!("failed to persist schedule trace: {e}");
            None
        }
    }
}

pub(crate) fn capture_backtrace() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}
