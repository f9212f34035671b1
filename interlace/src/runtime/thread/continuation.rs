//! Green-thread continuations for operations.
//!
//! Every operation runs on its own stackful coroutine (a `generator` crate
//! green thread). The step loop resumes exactly one continuation at a time;
//! a running operation suspends itself by calling [`switch`], which yields
//! control back to the step loop. Because allocating a fresh coroutine stack
//! for every operation of every iteration is expensive, parked continuations
//! are recycled through a thread-local pool across executions.

use generator::{Generator, Gn};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Inputs sent into a continuation when it is resumed.
pub(crate) enum ContinuationInput {
    /// Continue running the installed function from its last suspension.
    Resume,
    /// The pool is being dropped; unwind out of the parked loop.
    Exit,
}

/// Outputs yielded by a continuation back to its driver.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ContinuationOutput {
    /// The installed function suspended itself at a scheduling point.
    Yielded,
    /// The installed function ran to completion.
    Finished,
    /// The continuation's coroutine has unwound and cannot be reused.
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContinuationState {
    /// Parked in the pool with no function installed.
    NotReady,
    /// A function has been installed but not yet started or is mid-run.
    Ready,
}

/// The slot through which a function is smuggled into the coroutine closure.
///
/// The coroutine closure and the `Continuation` handle share this cell; the
/// input channel of the generator only carries resume/exit signals, so the
/// first resume of a fresh function does not need a special input variant.
struct FunctionSlot(Rc<RefCell<Option<Box<dyn FnOnce() + Send>>>>);

// Safety: a continuation (and therefore its function slot) never leaves the
// thread that created it; the pool is thread-local and `ExecutionState` pins
// each execution to a single OS thread.
unsafe impl Send for FunctionSlot {}

impl Clone for FunctionSlot {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

pub(crate) struct Continuation {
    generator: Generator<'static, ContinuationInput, ContinuationOutput>,
    function: FunctionSlot,
    state: ContinuationState,
    stack_size: usize,
    /// Whether the coroutine has ever been resumed. A never-started
    /// coroutine must not be sent Exit: its closure would start running and
    /// find no function installed.
    started: bool,
}

impl Continuation {
    pub(crate) fn new(stack_size: usize) -> Self {
        let function = FunctionSlot(Rc::new(RefCell::new(None)));

        let generator: Generator<'static, ContinuationInput, ContinuationOutput> = {
            let function = function.clone();
            Gn::new_opt(stack_size, move || {
                let function = function;
                loop {
                    let f = function
                        .0
                        .borrow_mut()
                        .take()
                        .expect("continuation resumed without a function installed");
                    f();

                    // Park until the next function is installed, or exit if
                    // the pool is tearing down.
                    match generator::yield_(ContinuationOutput::Finished) {
                        None | Some(ContinuationInput::Exit) => break,
                        Some(ContinuationInput::Resume) => (),
                    }
                }

                ContinuationOutput::Exited
            })
        };

        Self {
            generator,
            function,
            state: ContinuationState::NotReady,
            stack_size,
            started: false,
        }
    }

    /// Install the function this continuation will run. Must be parked.
    pub(crate) fn initialize(&mut self, f: Box<dyn FnOnce() + Send>) {
        debug_assert_eq!(self.state, ContinuationState::NotReady);
        let old = self.function.0.borrow_mut().replace(f);
        debug_assert!(old.is_none(), "continuation already had a function");
        self.state = ContinuationState::Ready;
    }

    /// Resume the continuation. Returns true if the installed function ran
    /// to completion, false if it suspended at a scheduling point.
    pub(crate) fn resume(&mut self) -> bool {
        debug_assert_eq!(self.state, ContinuationState::Ready);
        self.started = true;

        match self.generator.send(ContinuationInput::Resume) {
            ContinuationOutput::Yielded => false,
            ContinuationOutput::Finished => {
                self.state = ContinuationState::NotReady;
                true
            }
            ContinuationOutput::Exited => panic!("continuation exited while running"),
        }
    }

    fn reusable(&self) -> bool {
        self.state == ContinuationState::NotReady && !self.generator.is_done()
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        // A parked coroutine is blocked on its `yield_`; give it a chance to
        // unwind cleanly rather than tearing down a live stack. A coroutine
        // that never ran has no stack to unwind.
        if self.started && self.reusable() {
            let r = self.generator.send(ContinuationInput::Exit);
            debug_assert_eq!(r, ContinuationOutput::Exited);
        }
    }
}

/// Suspend the currently running continuation, yielding back to the step
/// loop. Returns when the scheduler selects this operation again.
pub(crate) fn switch() {
    let r = generator::yield_(ContinuationOutput::Yielded);
    assert!(
        matches!(r, Some(ContinuationInput::Resume)),
        "continuation was torn down while suspended"
    );
}

thread_local! {
    static CONTINUATION_POOL: ContinuationPool = ContinuationPool::new();
}

/// A thread-local pool of parked continuations.
pub(crate) struct ContinuationPool {
    queue: Rc<RefCell<VecDeque<Continuation>>>,
}

impl ContinuationPool {
    fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Acquire a continuation with the given stack size, reusing a parked
    /// one when available.
    pub(crate) fn acquire(stack_size: usize) -> PooledContinuation {
        CONTINUATION_POOL.with(|pool| {
            let mut queue = pool.queue.borrow_mut();
            let continuation = queue
                .iter()
                .position(|c| c.stack_size >= stack_size)
                .and_then(|i| queue.remove(i))
                .unwrap_or_else(|| {
                    log::trace!("allocating a fresh {stack_size}-byte continuation stack");
                    Continuation::new(stack_size)
                });
            PooledContinuation {
                continuation: Some(continuation),
                queue: Rc::clone(&pool.queue),
            }
        })
    }
}

/// A pool-owned continuation handle. Returns its continuation to the pool
/// on drop if the coroutine parked cleanly, and drops it otherwise (a
/// coroutine suspended mid-function at teardown unwinds via `Continuation`'s
/// own drop).
pub(crate) struct PooledContinuation {
    continuation: Option<Continuation>,
    queue: Rc<RefCell<VecDeque<Continuation>>>,
}

impl PooledContinuation {
    pub(crate) fn initialize(&mut self, f: Box<dyn FnOnce() + Send>) {
        self.continuation
            .as_mut()
            .expect("continuation already reclaimed")
            .initialize(f);
    }

    pub(crate) fn resume(&mut self) -> bool {
        self.continuation
            .as_mut()
            .expect("continuation already reclaimed")
            .resume()
    }
}

impl Drop for PooledContinuation {
    fn drop(&mut self) {
        if let Some(c) = self.continuation.take() {
            if c.reusable() {
                self.queue.borrow_mut().push_back(c);
            }
        }
    }
}

impl std::fmt::Debug for PooledContinuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledContinuation").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn continuation_runs_to_completion() {
        let mut c = Continuation::new(0x8000);
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        c.initialize(Box::new(move || {
            r.store(true, Ordering::SeqCst);
        }));
        assert!(c.resume());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn continuation_suspends_and_resumes() {
        let mut c = Continuation::new(0x8000);
        c.initialize(Box::new(|| {
            switch();
            switch();
        }));
        assert!(!c.resume());
        assert!(!c.resume());
        assert!(c.resume());
    }

    #[test]
    fn pooled_continuation_is_recycled() {
        let first = ContinuationPool::acquire(0x8000);
        drop(first);
        let mut second = ContinuationPool::acquire(0x8000);
        second.initialize(Box::new(|| {}));
        assert!(second.resume());
    }
}
