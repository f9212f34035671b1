//! Async task interception: futures run as operations, awaits are
//! scheduling points.
//!
//! `spawn` wraps a future in an operation that polls it with a waker tied
//! to that operation: `Poll::Pending` parks the operation unless the waker
//! already fired, and a wake from anywhere re-enables it. `block_on` drives
//! a future on the current operation the same way.

use crate::runtime::execution::ExecutionState;
use crate::runtime::operation::OperationId;
use crate::runtime::SchedulePoint;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// The spawned task can no longer produce a value (it was canceled when the
/// runtime detached, or it unwound).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinError;

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the spawned task was canceled before completing")
    }
}

impl std::error::Error for JoinError {}

struct JoinState<T> {
    result: Option<T>,
    waker: Option<std::task::Waker>,
}

/// Awaitable handle to a spawned task.
pub struct JoinHandle<T> {
    op: OperationId,
    state: Arc<Mutex<JoinState<T>>>,
}

impl<T> JoinHandle<T> {
    /// The id of the operation running the task.
    pub fn id(&self) -> OperationId {
        self.op
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock().expect("join state poisoned");
        if let Some(value) = state.result.take() {
            return Poll::Ready(Ok(value));
        }
        let finished = ExecutionState::try_with(|s| {
            s.try_get(self.op).map(|op| op.finished()).unwrap_or(true)
        })
        .unwrap_or(true);
        if finished {
            // Completed without publishing a result: canceled or unwound.
            return Poll::Ready(Err(JoinError));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Spawn a future as a new operation. The future starts running when the
/// strategy first selects its operation.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let state = Arc::new(Mutex::new(JoinState {
        result: None,
        waker: None,
    }));
    let shared = Arc::clone(&state);
    let op = crate::runtime::spawn_named(Some("future"), move || {
        let output = drive(future);
        let waker = {
            let mut s = shared.lock().expect("join state poisoned");
            s.result = Some(output);
            s.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    });
    JoinHandle { op, state }
}

/// Drive a future to completion on the current operation.
pub fn block_on<F: Future>(future: F) -> F::Output {
    drive(future)
}

fn drive<F: Future>(future: F) -> F::Output {
    let mut future = Box::pin(future);
    let waker = ExecutionState::with(|state| state.current().waker());
    let mut cx = Context::from_waker(&waker);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => {
                // Park unless a waker already fired during this poll, then
                // let the scheduler pick who runs while we wait.
                ExecutionState::with(|state| {
                    state.current_mut().block_unless_woken();
                });
                crate::runtime::schedule_point_or_interrupt(SchedulePoint::Continue);
            }
        }
    }
}

/// A future that suspends exactly once, yielding the operation to the
/// scheduler.
pub fn yield_now() -> impl Future<Output = ()> {
    struct YieldNow {
        yielded: bool,
    }

    impl Future for YieldNow {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.yielded {
                Poll::Ready(())
            } else {
                self.yielded = true;
                // Re-arm immediately: the suspension is the yield itself.
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    YieldNow { yielded: false }
}
