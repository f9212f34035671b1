use crate::actor::ActorArena;
use crate::error::{BugKind, Interrupt};
use crate::runtime::failure::panic_message;
use crate::runtime::operation::{Operation, OperationId, OperationStatus, DEFAULT_INLINE_OPS};
use crate::runtime::thread::continuation::PooledContinuation;
use crate::runtime::Runtime;
use scoped_tls::scoped_thread_local;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::panic;
use std::rc::Rc;

// We use this scoped TLS to smuggle the ExecutionState, which is not 'static,
// across operations that need access to it (to spawn new operations,
// interrogate statuses, etc).
scoped_thread_local! {
    static EXECUTION_STATE: RefCell<ExecutionState>
}

/// An `Execution` encapsulates a single iteration of a program under test
/// against a chosen strategy. Its only useful method is `Execution::run`,
/// which drives the root operation (and everything it spawns) to completion,
/// deadlock, a recorded bug, or detach.
///
/// The key thing an `Execution` manages is the `ExecutionState`: the mutable
/// state operations need mid-run (to block/unblock each other, spawn new
/// operations, reach actor inboxes). It is made available through the
/// `EXECUTION_STATE` scoped TLS; clients reach it via `ExecutionState::with`.
pub(crate) struct Execution {
    runtime: Rc<RefCell<Runtime>>,
}

impl Execution {
    pub(crate) fn new(runtime: Rc<RefCell<Runtime>>) -> Self {
        Self { runtime }
    }

    /// Run a program to completion, taking control of scheduling it and any
    /// operations it spawns. Returns when every operation has finished, when
    /// a bug is recorded, or when the strategy stops the exploration.
    pub(crate) fn run<F>(mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let state = RefCell::new(ExecutionState::new(Rc::clone(&self.runtime)));

        EXECUTION_STATE.set(&state, move || {
            // Monitors observe from the very start of the iteration: their
            // initial-state entry actions run before the root operation.
            let monitors = ExecutionState::with(|state| state.runtime.borrow().monitors.all());
            let init = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                for monitor in &monitors {
                    crate::monitor::initialize(monitor);
                }
            }));
            if let Err(payload) = init {
                ExecutionState::with(|state| {
                    let mut runtime = state.runtime.borrow_mut();
                    if payload.downcast_ref::<Interrupt>().is_none() && runtime.failure.is_none() {
                        let message = panic_message(payload.as_ref());
                        runtime.record_failure(
                            BugKind::UnhandledException,
                            format!("unhandled panic while initializing monitors: {message}"),
                            None,
                            None,
                        );
                    }
                    runtime.detach();
                });
            }

            let canceled = ExecutionState::with(|state| state.runtime.borrow().is_detached());
            if !canceled {
                ExecutionState::spawn(f, Some("operation-0".to_string()));
                while self.step() {}
            }

            // Clean up the state before it goes out of `EXECUTION_STATE`
            // scope, so operation drop handlers can still reach it.
            ExecutionState::cleanup();
        });
    }

    /// Execute a single step of the scheduler. Returns true if the
    /// execution should continue.
    #[inline]
    fn step(&mut self) -> bool {
        enum NextStep {
            Op(Rc<RefCell<PooledContinuation>>),
            Finished,
        }

        let next_step = ExecutionState::with(|state| {
            state.schedule();
            state.advance_to_next_op();

            match state.current_op {
                ScheduledOp::Some(id) => NextStep::Op(Rc::clone(&state.get(id).continuation)),
                ScheduledOp::Finished => {
                    // The strategy saw an empty enabled set. If some
                    // operation is still unfinished, that's a deadlock.
                    let blocked = state
                        .operations
                        .iter()
                        .filter(|op| !op.finished())
                        .map(|op| format!("{} (operation {})", op.display_name(), op.id()))
                        .collect::<Vec<_>>();
                    if !blocked.is_empty() {
                        let message = format!(
                            "deadlock detected: no operation is enabled but [{}] have not finished",
                            blocked.join(", ")
                        );
                        state
                            .runtime
                            .borrow_mut()
                            .record_failure(BugKind::Deadlock, message, None, None);
                    }
                    NextStep::Finished
                }
                ScheduledOp::Stopped => NextStep::Finished,
                ScheduledOp::None => panic!("no operation was scheduled"),
            }
        });

        // Run a single step of the chosen operation.
        let continuation = match next_step {
            NextStep::Op(continuation) => continuation,
            NextStep::Finished => return false,
        };

        let ret = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            continuation.borrow_mut().resume()
        }));

        match ret {
            // Operation finished
            Ok(true) => {
                ExecutionState::with(|state| {
                    let id = state.current().id();
                    state.current_mut().finish();
                    state.notify_completed(id);
                });
            }
            // Operation yielded
            Ok(false) => {}
            // Operation unwound: either our own quiet teardown (Interrupt,
            // failure already recorded or runtime detached) or a genuine
            // panic escaping user code.
            Err(payload) => {
                ExecutionState::with(|state| {
                    let (id, name) = {
                        let op = state.current();
                        (op.id(), op.display_name())
                    };
                    state.current_mut().cancel();
                    let mut runtime = state.runtime.borrow_mut();
                    if payload.downcast_ref::<Interrupt>().is_none() && runtime.failure.is_none() {
                        let message = panic_message(payload.as_ref());
                        runtime.record_failure(
                            BugKind::UnhandledException,
                            format!("unhandled panic in {name}: {message}"),
                            Some(id),
                            Some(name.clone()),
                        );
                    } else {
                        runtime.detach();
                    }
                });
            }
        }

        true
    }
}

/// `ExecutionState` contains the portion of a single iteration's state that
/// must be reachable from within an operation's execution: the operation
/// table, the actor arena, and the shared runtime handle.
pub(crate) struct ExecutionState {
    pub(crate) operations: SmallVec<[Operation; DEFAULT_INLINE_OPS]>,
    // invariant: if this transitions to Stopped or Finished, it never
    // changes again
    current_op: ScheduledOp,
    // the operation the strategy has chosen to run next
    next_op: ScheduledOp,
    // the current operation called yield_now since its last decision
    is_yielding: bool,
    // nonzero while a monitor handler runs on the current stack
    in_monitor: u32,
    stack_size: usize,
    pub(crate) actors: ActorArena,
    pub(crate) runtime: Rc<RefCell<Runtime>>,
    #[cfg(debug_assertions)]
    has_cleaned_up: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ScheduledOp {
    None,               // no operation has ever been scheduled
    Some(OperationId),  // this operation is running
    Stopped,            // the strategy asked us to stop exploring
    Finished,           // no operation is enabled
}

impl ScheduledOp {
    fn id(&self) -> Option<OperationId> {
        match self {
            ScheduledOp::Some(id) => Some(*id),
            _ => None,
        }
    }

    fn take(&mut self) -> Self {
        std::mem::replace(self, ScheduledOp::None)
    }
}

impl ExecutionState {
    fn new(runtime: Rc<RefCell<Runtime>>) -> Self {
        let stack_size = runtime.borrow().stack_size();
        Self {
            operations: SmallVec::new(),
            current_op: ScheduledOp::None,
            next_op: ScheduledOp::None,
            is_yielding: false,
            in_monitor: 0,
            stack_size,
            actors: ActorArena::default(),
            runtime,
            #[cfg(debug_assertions)]
            has_cleaned_up: false,
        }
    }

    /// Invoke a closure with access to the current execution state. Library
    /// code uses this to influence scheduling (e.g. to register an
    /// operation as blocked).
    #[inline]
    pub(crate) fn with<F, T>(f: F) -> T
    where
        F: FnOnce(&mut ExecutionState) -> T,
    {
        Self::try_with(f).expect(
            "the interlace API (spawn, send, nondet, etc.) may only be used from \
             operations running inside a verify() call",
        )
    }

    /// Like `with`, but returns None instead of panicking if there is no
    /// current ExecutionState or it is already borrowed.
    #[inline]
    pub(crate) fn try_with<F, T>(f: F) -> Option<T>
    where
        F: FnOnce(&mut ExecutionState) -> T,
    {
        if EXECUTION_STATE.is_set() {
            EXECUTION_STATE.with(|cell| {
                if let Ok(mut state) = cell.try_borrow_mut() {
                    Some(f(&mut state))
                } else {
                    None
                }
            })
        } else {
            None
        }
    }

    /// Register a new operation. It becomes Enabled immediately but only
    /// runs once the strategy selects it.
    pub(crate) fn spawn<F>(f: F, name: Option<String>) -> OperationId
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with(|state| {
            let id = OperationId(state.operations.len());
            let mut op = Operation::from_closure(f, state.stack_size, id, name);
            debug_assert_eq!(op.status, OperationStatus::None);
            op.enable();
            log::trace!("registered {}", op.display_name());
            state.operations.push(op);
            id
        })
    }

    /// Prepare this ExecutionState to be dropped: cancel whatever the
    /// iteration left unfinished and reclaim the continuations. Operations
    /// are pulled out of the state first so their drop handlers can call
    /// back into `ExecutionState` while it is still in scope.
    pub(crate) fn cleanup() {
        let mut operations = Self::with(|state| {
            let clean = {
                let runtime = state.runtime.borrow();
                !runtime.is_detached() && runtime.failure.is_none()
            };
            for op in state.operations.iter_mut() {
                debug_assert!(
                    !clean || op.finished(),
                    "execution finished cleanly but an operation is unfinished"
                );
                op.cancel();
            }
            std::mem::take(&mut state.operations)
        });

        for op in operations.drain(..) {
            Rc::try_unwrap(op.continuation)
                .map_err(|_| ())
                .expect("an operation's continuation outlived the execution");
        }

        #[cfg(debug_assertions)]
        Self::with(|state| state.has_cleaned_up = true);
    }

    /// Invoke the scheduler to decide which operation runs next. Returns
    /// true if the choice differs from the current operation, meaning the
    /// caller must yield its continuation.
    pub(crate) fn maybe_yield() -> bool {
        Self::with(|state| {
            debug_assert!(
                matches!(state.current_op, ScheduledOp::Some(_))
                    && state.next_op == ScheduledOp::None,
                "we're inside an operation and the scheduler should not have run yet"
            );

            state.schedule();

            // If the next operation is the same as the current one, skip the
            // context switch and advance immediately.
            if state.current_op == state.next_op {
                state.advance_to_next_op();
                false
            } else {
                true
            }
        })
    }

    pub(crate) fn current(&self) -> &Operation {
        self.get(self.current_op.id().expect("no operation is running"))
    }

    pub(crate) fn current_mut(&mut self) -> &mut Operation {
        self.get_mut(self.current_op.id().expect("no operation is running"))
    }

    pub(crate) fn current_id(&self) -> Option<OperationId> {
        self.current_op.id()
    }

    pub(crate) fn get(&self, id: OperationId) -> &Operation {
        self.try_get(id).expect("unknown operation id")
    }

    pub(crate) fn get_mut(&mut self, id: OperationId) -> &mut Operation {
        self.operations.get_mut(id.0).expect("unknown operation id")
    }

    pub(crate) fn try_get(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id.0)
    }

    pub(crate) fn try_get_mut(&mut self, id: OperationId) -> Option<&mut Operation> {
        self.operations.get_mut(id.0)
    }

    pub(crate) fn set_yielding(&mut self, yielding: bool) {
        self.is_yielding = yielding;
    }

    pub(crate) fn in_monitor(&self) -> bool {
        self.in_monitor > 0
    }

    pub(crate) fn enter_monitor() {
        let _ = Self::try_with(|state| state.in_monitor += 1);
    }

    pub(crate) fn exit_monitor() {
        let _ = Self::try_with(|state| state.in_monitor = state.in_monitor.saturating_sub(1));
    }

    /// A finished operation unblocks anything waiting on it.
    pub(crate) fn notify_completed(&mut self, finished: OperationId) {
        for op in self.operations.iter_mut() {
            match op.status {
                OperationStatus::BlockedOnWaitAll => {
                    op.waiting_on.retain(|id| *id != finished);
                    if op.waiting_on.is_empty() {
                        op.enable();
                    }
                }
                OperationStatus::BlockedOnWaitAny => {
                    if op.waiting_on.contains(&finished) {
                        op.enable();
                    }
                }
                _ => {}
            }
        }
    }

    /// Run the strategy to choose the next operation. Does nothing if a
    /// choice is already pending (i.e. `maybe_yield` ran it already).
    fn schedule(&mut self) {
        if self.next_op != ScheduledOp::None {
            return;
        }

        let enabled = self
            .operations
            .iter()
            .filter(|op| op.runnable())
            .map(|op| op.id())
            .collect::<SmallVec<[OperationId; DEFAULT_INLINE_OPS]>>();

        if enabled.is_empty() {
            self.next_op = ScheduledOp::Finished;
            return;
        }

        let current = self.current_op.id();
        let is_yielding = std::mem::take(&mut self.is_yielding);
        self.next_op = self
            .runtime
            .borrow_mut()
            .next_operation(&enabled, current, is_yielding)
            .map(ScheduledOp::Some)
            .unwrap_or(ScheduledOp::Stopped);
    }

    /// Set the chosen operation as current and update its counters.
    fn advance_to_next_op(&mut self) {
        debug_assert_ne!(self.next_op, ScheduledOp::None);
        let previous = self.current_op;
        self.current_op = self.next_op.take();

        if let ScheduledOp::Some(id) = self.current_op {
            let same = previous == self.current_op;
            let op = self.get_mut(id);
            op.times_scheduled += 1;
            op.consecutive_scheduled = if same { op.consecutive_scheduled + 1 } else { 1 };
            log::trace!(
                "running {} (scheduled {} times, {} consecutively)",
                op.display_name(),
                op.times_scheduled,
                op.consecutive_scheduled
            );
        }
    }
}

#[cfg(debug_assertions)]
impl Drop for ExecutionState {
    fn drop(&mut self) {
        assert!(self.has_cleaned_up || std::thread::panicking());
    }
}
