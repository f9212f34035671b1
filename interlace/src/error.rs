//! Externally distinguishable failure kinds.

use crate::runtime::operation::OperationId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a bug found while exploring schedules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BugKind {
    /// A user or monitor assertion evaluated to false.
    AssertionFailure,
    /// No operation was enabled while some remained unfinished.
    Deadlock,
    /// A panic escaped an event handler or operation body.
    UnhandledException,
    /// The scheduling-step bound was hit and the configuration treats that
    /// as a bug.
    MaxStepsReached,
    /// Monitor temperature reached the liveness threshold.
    LivenessViolation,
    /// A replayed trace diverged from the program's behavior.
    TraceNotReproducible,
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BugKind::AssertionFailure => "assertion failure",
            BugKind::Deadlock => "deadlock",
            BugKind::UnhandledException => "unhandled exception",
            BugKind::MaxStepsReached => "max scheduling steps reached",
            BugKind::LivenessViolation => "liveness violation",
            BugKind::TraceNotReproducible => "trace not reproducible",
        };
        f.write_str(s)
    }
}

/// A recorded bug: the structured counterpart of the `on_failure` callback.
#[derive(Clone, Debug, Serialize)]
pub struct Failure {
    pub kind: BugKind,
    pub message: String,
    /// Global scheduling step at which the bug was recorded.
    pub step: u64,
    /// The operation that was running when the bug was recorded, if any.
    pub operation: Option<OperationId>,
    /// Human-readable name of that operation.
    pub operation_name: Option<String>,
    /// Captured backtrace, when the platform provides one.
    pub backtrace: Option<String>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(name) = &self.operation_name {
            write!(f, " (in {name})")?;
        }
        write!(f, " at step {}", self.step)
    }
}

/// Error value propagated by every suspension point once the runtime has
/// detached. Each operation's entry frame translates it into quiet teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("execution canceled: the runtime has detached")]
pub struct ExecutionCanceled;

/// Panic payload used internally to unwind an operation whose failure has
/// already been recorded (or whose runtime has detached). The step loop
/// swallows it.
pub(crate) struct Interrupt;

/// Errors loading or parsing a schedule trace file.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("failed to read schedule trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("schedule trace is missing its `# strategy=... fair=...` header line")]
    MissingHeader,
    #[error("schedule header is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("schedule trace line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}
