//! Operation records: the unit of cooperative scheduling.

use crate::runtime::execution::ExecutionState;
use crate::runtime::thread::continuation::{ContinuationPool, PooledContinuation};
use futures::task::{waker, ArcWake};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Waker;

pub(crate) const DEFAULT_INLINE_OPS: usize = 16;

/// Identifier of an operation, assigned monotonically at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub(crate) usize);

impl OperationId {
    pub fn to_usize(self) -> usize {
        self.0
    }
}

impl From<usize> for OperationId {
    fn from(id: usize) -> Self {
        OperationId(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an operation.
///
/// Exactly one operation is Enabled-and-running at any instant; the rest are
/// Enabled-and-waiting-to-be-selected, blocked, or finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Registered but not yet started.
    None,
    /// Runnable; the strategy may select it.
    Enabled,
    /// Waiting for every operation in its wait set to finish.
    BlockedOnWaitAll,
    /// Waiting for any operation in its wait set to finish.
    BlockedOnWaitAny,
    /// An actor waiting for a deliverable event.
    BlockedOnReceive,
    /// Waiting for a synchronization resource or a wakeup.
    BlockedOnResource,
    /// Ran to completion.
    Completed,
    /// Released with cancellation when the runtime detached.
    Canceled,
}

pub(crate) struct Operation {
    pub(crate) id: OperationId,
    name: Option<String>,
    pub(crate) status: OperationStatus,
    /// Operations this one is blocked on, for the WaitAll/WaitAny statuses.
    pub(crate) waiting_on: SmallVec<[OperationId; 4]>,
    /// Total number of times the strategy has selected this operation.
    pub(crate) times_scheduled: u64,
    /// Length of the current consecutive run of selections.
    pub(crate) consecutive_scheduled: u64,
    pub(crate) continuation: Rc<RefCell<PooledContinuation>>,
    /// Set when this operation's waker fired while it was still running, so
    /// the next `block_unless_woken` is a no-op.
    woken: bool,
}

impl Operation {
    /// Create an operation that will run `f` on a pooled continuation.
    pub(crate) fn from_closure<F>(
        f: F,
        stack_size: usize,
        id: OperationId,
        name: Option<String>,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut continuation = ContinuationPool::acquire(stack_size);
        continuation.initialize(Box::new(f));
        Self {
            id,
            name,
            status: OperationStatus::None,
            waiting_on: SmallVec::new(),
            times_scheduled: 0,
            consecutive_scheduled: 0,
            continuation: Rc::new(RefCell::new(continuation)),
            woken: false,
        }
    }

    pub(crate) fn id(&self) -> OperationId {
        self.id
    }

    pub(crate) fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("operation-{}", self.id.0))
    }

    pub(crate) fn runnable(&self) -> bool {
        self.status == OperationStatus::Enabled
    }

    pub(crate) fn finished(&self) -> bool {
        matches!(
            self.status,
            OperationStatus::Completed | OperationStatus::Canceled
        )
    }

    /// Mark enabled. Idempotent for already-enabled operations; never
    /// resurrects a finished one.
    pub(crate) fn enable(&mut self) {
        debug_assert!(
            !self.finished(),
            "a finished operation can never become enabled again"
        );
        self.status = OperationStatus::Enabled;
        self.waiting_on.clear();
    }

    pub(crate) fn block(&mut self, status: OperationStatus, waiting_on: &[OperationId]) {
        debug_assert!(matches!(
            status,
            OperationStatus::BlockedOnWaitAll
                | OperationStatus::BlockedOnWaitAny
                | OperationStatus::BlockedOnReceive
                | OperationStatus::BlockedOnResource
        ));
        self.status = status;
        self.waiting_on = waiting_on.iter().copied().collect();
    }

    /// Park on a resource unless a waker already fired for this operation.
    pub(crate) fn block_unless_woken(&mut self) -> bool {
        if self.woken {
            self.woken = false;
            false
        } else {
            self.block(OperationStatus::BlockedOnResource, &[]);
            true
        }
    }

    /// A waker fired: re-enable if parked, otherwise remember the wake.
    pub(crate) fn wake(&mut self) {
        match self.status {
            OperationStatus::BlockedOnResource => self.enable(),
            OperationStatus::Completed | OperationStatus::Canceled => (),
            _ => self.woken = true,
        }
    }

    pub(crate) fn finish(&mut self) {
        debug_assert!(!self.finished());
        self.status = OperationStatus::Completed;
        self.waiting_on.clear();
    }

    pub(crate) fn cancel(&mut self) {
        if !self.finished() {
            self.status = OperationStatus::Canceled;
            self.waiting_on.clear();
        }
    }

    /// A `std::task::Waker` that re-enables this operation when woken.
    pub(crate) fn waker(&self) -> Waker {
        waker(Arc::new(OperationWaker { id: self.id }))
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Waker backing for operations that park on futures. Waking outside of an
/// execution (or for an already-finished operation) is a no-op.
struct OperationWaker {
    id: OperationId,
}

impl ArcWake for OperationWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let id = arc_self.id;
        ExecutionState::try_with(|state| {
            if let Some(op) = state.try_get_mut(id) {
                op.wake();
            }
        });
    }
}
