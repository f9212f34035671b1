//! The interception surface: the declared contract through which rewritten
//! (or directly authored) code reaches the scheduler.
//!
//! Everything here is also what the crate-root convenience API is built on;
//! a rewriting pass that substitutes synchronization primitives only needs
//! the entry points in this module.

pub use crate::runtime::SchedulePoint;

use crate::actor::ActorId;
use crate::error::{BugKind, ExecutionCanceled, Interrupt};
use crate::monitor::Monitor;
use crate::runtime::execution::ExecutionState;
use crate::runtime::operation::{OperationId, OperationStatus};
use smallvec::SmallVec;

/// Register a new concurrent operation running `f` and hit a Create
/// scheduling point. The operation's id is assigned monotonically.
pub fn on_create_operation<F>(name: Option<String>, f: F) -> OperationId
where
    F: FnOnce() + Send + 'static,
{
    crate::runtime::spawn_named(name, f)
}

/// A declared scheduling point of the given kind. Returns the error value
/// once the runtime has detached; the caller is expected to tear down.
pub fn on_schedule_point(kind: SchedulePoint) -> Result<(), ExecutionCanceled> {
    crate::runtime::schedule_point(kind)
}

/// Explicitly complete an operation. Normally completion happens when the
/// operation's closure returns; rewritten code that manages its own
/// lifecycle calls this as its final act.
pub fn on_complete_operation(id: OperationId) {
    ExecutionState::with(|state| {
        let op = state.get_mut(id);
        if !op.finished() {
            op.finish();
        }
        state.notify_completed(id);
    });
    // The completed operation is out of the enabled set, so this decision
    // is made on its behalf and control never returns here.
    crate::runtime::schedule_point_or_interrupt(SchedulePoint::Stop);
}

/// Block the current operation until the given operations finish: all of
/// them (`wait_all`) or at least one.
pub fn on_wait(ids: &[OperationId], wait_all: bool) -> Result<(), ExecutionCanceled> {
    ExecutionState::with(|state| {
        let pending = ids
            .iter()
            .copied()
            .filter(|id| !state.get(*id).finished())
            .collect::<SmallVec<[OperationId; 4]>>();
        if !pending.is_empty() {
            let status = if wait_all {
                OperationStatus::BlockedOnWaitAll
            } else {
                OperationStatus::BlockedOnWaitAny
            };
            state.current_mut().block(status, &pending);
        }
    });
    crate::runtime::schedule_point(SchedulePoint::Wait)
}

/// An actor found nothing deliverable: park it until a send re-enables it.
pub fn on_receive_enter(actor: ActorId) {
    log::trace!("actor {actor} blocked on receive");
    ExecutionState::with(|state| {
        state
            .current_mut()
            .block(OperationStatus::BlockedOnReceive, &[]);
    });
    crate::runtime::schedule_point_or_interrupt(SchedulePoint::Receive);
}

/// An actor dequeued an event: the Receive scheduling point.
pub fn on_receive_exit(actor: ActorId) {
    log::trace!("actor {actor} dequeued an event");
    crate::runtime::schedule_point_or_interrupt(SchedulePoint::Receive);
}

/// Strategy-chosen boolean, true with probability 1/max under the random
/// strategies. Emits a BooleanChoice trace step; never blocks.
pub fn next_boolean(max: u64) -> Result<bool, ExecutionCanceled> {
    reject_inside_monitor("next_boolean");
    let current = crate::runtime::current_operation();
    ExecutionState::with(|state| state.runtime.borrow_mut().next_boolean(current, max))
}

/// Strategy-chosen integer in `[0, max)`. Emits an IntegerChoice trace
/// step; never blocks.
pub fn next_integer(max: u64) -> Result<u64, ExecutionCanceled> {
    reject_inside_monitor("next_integer");
    let current = crate::runtime::current_operation();
    ExecutionState::with(|state| state.runtime.borrow_mut().next_integer(current, max))
}

/// Deliver an event to the registered monitor of type `M`, synchronously on
/// this stack.
pub fn on_monitor_event<M: Monitor>(event: &crate::actor::Event) {
    let monitor = ExecutionState::with(|state| state.runtime.borrow().monitors.find(M::name()));
    match monitor {
        Some(monitor) => crate::monitor::deliver(&monitor, event),
        None => notify_assertion_failure(format!("monitor '{}' is not registered", M::name())),
    }
}

/// Record an assertion failure, persist-worthy, and unwind the current
/// operation. Outside an execution this is a plain panic.
pub fn notify_assertion_failure(message: String) {
    notify_failure(BugKind::AssertionFailure, message);
}

/// Record a bug for a panic that escaped a handler.
pub fn notify_unhandled_exception(message: String) {
    notify_failure(BugKind::UnhandledException, message);
}

fn notify_failure(kind: BugKind, message: String) {
    let op = crate::runtime::current_operation();
    let name = ExecutionState::try_with(|state| {
        state.current_id().map(|_| state.current().display_name())
    })
    .flatten();
    let recorded = ExecutionState::try_with(|state| {
        state
            .runtime
            .borrow_mut()
            .record_failure(kind, message.clone(), op, name);
    });
    match recorded {
        Some(()) => std::panic::panic_any(Interrupt),
        // No execution to record into: surface directly.
        None => panic!("{message}"),
    }
}

/// Strategy choices and scheduling points are rejected while a monitor
/// handler runs: monitors observe, they do not perturb.
fn reject_inside_monitor(what: &str) {
    let inside = ExecutionState::with(|state| state.in_monitor());
    if inside {
        notify_assertion_failure(format!(
            "a monitor handler called {what}; monitors must not consult the strategy"
        ));
    }
}
