//! The core scheduler runtime: the arbiter that drives strategy decisions,
//! records the schedule trace, and detects bugs.

pub(crate) mod execution;
pub(crate) mod failure;
pub(crate) mod operation;
pub(crate) mod thread;

use crate::config::Config;
use crate::error::{BugKind, ExecutionCanceled, Failure, Interrupt};
use crate::monitor::MonitorSet;
use crate::runtime::execution::ExecutionState;
use crate::runtime::operation::{OperationId, OperationStatus};
use crate::schedule::{Schedule, ScheduleHeader};
use crate::strategy::Strategy;

/// A logical instant at which the scheduler may make a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchedulePoint {
    Create,
    Send,
    Receive,
    Yield,
    Wait,
    Acquire,
    Release,
    Continue,
    Stop,
    UserDefined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RuntimeStatus {
    Attached,
    Detached,
}

/// Everything one iteration shares besides the operation table: the
/// strategy, the growing trace, the monitor registry, and the failure slot.
/// Strategies are consulted while this is borrowed, so they can reach only
/// the enabled set passed in and their own state.
pub(crate) struct Runtime {
    config: Config,
    strategy: Box<dyn Strategy + Send>,
    pub(crate) schedule: Schedule,
    scheduled_steps: u64,
    status: RuntimeStatus,
    pub(crate) failure: Option<Failure>,
    pub(crate) monitors: MonitorSet,
    depth_bound_hit: bool,
}

pub(crate) struct RuntimeParts {
    pub(crate) strategy: Box<dyn Strategy + Send>,
    pub(crate) schedule: Schedule,
    pub(crate) failure: Option<Failure>,
    pub(crate) scheduled_steps: u64,
    pub(crate) depth_bound_hit: bool,
}

impl Runtime {
    pub(crate) fn new(config: &Config, strategy: Box<dyn Strategy + Send>, seed: Option<u64>) -> Self {
        let header = ScheduleHeader {
            strategy: strategy.description(),
            fair: strategy.is_fair(),
            seed,
        };
        Self {
            monitors: MonitorSet::from_factories(&config.monitors),
            config: config.clone(),
            strategy,
            schedule: Schedule::new(header),
            scheduled_steps: 0,
            status: RuntimeStatus::Attached,
            failure: None,
            depth_bound_hit: false,
        }
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.status == RuntimeStatus::Detached
    }

    /// Stop making decisions; every suspended operation is released with
    /// cancellation and the iteration winds down.
    pub(crate) fn detach(&mut self) {
        self.status = RuntimeStatus::Detached;
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.config.stack_size
    }

    /// One scheduling decision: feed the liveness temperature, enforce the
    /// depth bound, consult the strategy, and record the choice.
    pub(crate) fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
        is_yielding: bool,
    ) -> Option<OperationId> {
        if self.is_detached() {
            return None;
        }

        self.strategy.notify_monitor_status(self.monitors.any_hot());
        if let Some(message) = self.strategy.check_liveness() {
            let message = format!(
                "{message} (monitors in hot states: {:?})",
                self.monitors.hot_names()
            );
            self.record_failure(BugKind::LivenessViolation, message, current, None);
            return None;
        }

        if self.strategy.is_max_steps_reached() {
            self.depth_bound_hit = true;
            if self.config.consider_depth_bound_hit_as_bug {
                let message = format!(
                    "exploration hit the scheduling-step bound after {} steps",
                    self.strategy.step_count()
                );
                self.record_failure(BugKind::MaxStepsReached, message, current, None);
            } else {
                log::debug!(
                    "scheduling-step bound reached after {} steps; detaching",
                    self.strategy.step_count()
                );
                self.detach();
            }
            return None;
        }

        match self.strategy.next_operation(enabled, current, is_yielding) {
            Some(id) => {
                debug_assert!(enabled.contains(&id), "strategy chose a disabled operation");
                self.schedule.push_scheduling(id);
                self.scheduled_steps += 1;
                Some(id)
            }
            None => {
                if let Some(message) = self.strategy.error() {
                    self.record_failure(BugKind::TraceNotReproducible, message, current, None);
                } else {
                    self.detach();
                }
                None
            }
        }
    }

    pub(crate) fn next_boolean(
        &mut self,
        current: Option<OperationId>,
        max: u64,
    ) -> Result<bool, ExecutionCanceled> {
        if self.is_detached() {
            return Err(ExecutionCanceled);
        }
        match self.strategy.next_boolean(current, max) {
            Some(value) => {
                self.schedule.push_boolean(value);
                self.scheduled_steps += 1;
                Ok(value)
            }
            None => {
                if let Some(message) = self.strategy.error() {
                    self.record_failure(BugKind::TraceNotReproducible, message, current, None);
                } else {
                    self.detach();
                }
                Err(ExecutionCanceled)
            }
        }
    }

    pub(crate) fn next_integer(
        &mut self,
        current: Option<OperationId>,
        max: u64,
    ) -> Result<u64, ExecutionCanceled> {
        if self.is_detached() {
            return Err(ExecutionCanceled);
        }
        match self.strategy.next_integer(current, max) {
            Some(value) => {
                self.schedule.push_integer(value);
                self.scheduled_steps += 1;
                Ok(value)
            }
            None => {
                if let Some(message) = self.strategy.error() {
                    self.record_failure(BugKind::TraceNotReproducible, message, current, None);
                } else {
                    self.detach();
                }
                Err(ExecutionCanceled)
            }
        }
    }

    /// Record a bug and detach. The first recorded failure wins; later ones
    /// are logged and dropped.
    pub(crate) fn record_failure(
        &mut self,
        kind: BugKind,
        message: String,
        operation: Option<OperationId>,
        operation_name: Option<String>,
    ) {
        if self.failure.is_some() {
            log::debug!("suppressing subsequent failure ({kind}): {message}");
            self.detach();
            return;
        }
        let failure = Failure {
            kind,
            message,
            step: self.scheduled_steps,
            operation,
            operation_name,
            backtrace: failure::capture_backtrace(),
        };
        log::error!("{failure}");
        if let Some(callback) = &self.config.on_failure {
            callback(&failure);
        }
        self.failure = Some(failure);
        self.detach();
    }

    pub(crate) fn into_parts(self) -> RuntimeParts {
        RuntimeParts {
            strategy: self.strategy,
            schedule: self.schedule,
            failure: self.failure,
            scheduled_steps: self.scheduled_steps,
            depth_bound_hit: self.depth_bound_hit,
        }
    }
}

/// Register a new operation without a scheduling point; the caller decides
/// when the Create point happens (actors wire up their arena slot first).
pub(crate) fn register_operation<F>(name: Option<String>, f: F) -> OperationId
where
    F: FnOnce() + Send + 'static,
{
    ExecutionState::spawn(f, name)
}

/// Spawn a concurrent operation. Registers it, hits a Create scheduling
/// point, and returns its id; the operation itself runs when the strategy
/// first selects it.
pub fn spawn<F>(f: F) -> OperationId
where
    F: FnOnce() + Send + 'static,
{
    spawn_named(None::<String>, f)
}

/// Like [`spawn`], with a human-readable name for deadlock reports and logs.
pub fn spawn_named<F, N>(name: Option<N>, f: F) -> OperationId
where
    F: FnOnce() + Send + 'static,
    N: Into<String>,
{
    let id = register_operation(name.map(Into::into), f);
    schedule_point_or_interrupt(SchedulePoint::Create);
    id
}

/// Declared scheduling point. Fails with `ExecutionCanceled` once the
/// runtime has detached.
pub(crate) fn schedule_point(kind: SchedulePoint) -> Result<(), ExecutionCanceled> {
    if ExecutionState::with(|state| state.in_monitor()) {
        crate::rt::notify_assertion_failure(
        "a monitor handler reached a scheduling point; monitors must not send events or block"
                .to_string(),
        );
    }
    if ExecutionState::with(|state| state.runtime.borrow().is_detached()) {
        return Err(ExecutionCanceled);
    }
    log::trace!("scheduling point: {kind:?}");
    if kind == SchedulePoint::Yield {
        ExecutionState::with(|state| state.set_yielding(true));
    }
    if ExecutionState::maybe_yield() {
        thread::continuation::switch();
    }
    if ExecutionState::with(|state| state.runtime.borrow().is_detached()) {
        Err(ExecutionCanceled)
    } else {
        Ok(())
    }
}

/// Scheduling point for callers with no error channel: cancellation tears
/// the operation down quietly through the step loop.
pub(crate) fn schedule_point_or_interrupt(kind: SchedulePoint) {
    if schedule_point(kind).is_err() {
        std::panic::panic_any(Interrupt);
    }
}

/// Voluntarily yield to the scheduler, hinting that another operation
/// should run.
pub fn yield_now() {
    schedule_point_or_interrupt(SchedulePoint::Yield);
}

/// Inject a nondeterministic delay: a strategy-chosen number of yield
/// points in `[0, max]`. Recorded in the trace, so replays reproduce it.
pub fn delay(max: u64) {
    let steps = match crate::rt::next_integer(max.saturating_add(1)) {
        Ok(steps) => steps,
        Err(_) => std::panic::panic_any(Interrupt),
    };
    for _ in 0..steps {
        schedule_point_or_interrupt(SchedulePoint::Yield);
    }
}

/// Block until every operation in `ids` has finished.
pub fn join_all(ids: &[OperationId]) {
    if crate::rt::on_wait(ids, true).is_err() {
        std::panic::panic_any(Interrupt);
    }
}

/// Block until at least one operation in `ids` has finished.
pub fn join_any(ids: &[OperationId]) {
    if crate::rt::on_wait(ids, false).is_err() {
        std::panic::panic_any(Interrupt);
    }
}

/// Block the current operation with `status` and yield until re-enabled.
pub(crate) fn block_current(status: OperationStatus, waiting_on: &[OperationId], kind: SchedulePoint) {
    ExecutionState::with(|state| state.current_mut().block(status, waiting_on));
    schedule_point_or_interrupt(kind);
}

pub(crate) fn current_operation() -> Option<OperationId> {
    ExecutionState::try_with(|state| state.current_id()).flatten()
}
