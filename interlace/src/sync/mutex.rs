//! A mutex modeled through the scheduler.
//!
//! `lock()` is an Acquire scheduling point; contenders park as
//! `BlockedOnResource` and are all re-enabled on release so they re-contend
//! under the strategy's control. The data itself sits behind an ordinary
//! `std` mutex that the model keeps uncontended: only the model-level
//! holder ever touches it.

use crate::runtime::execution::ExecutionState;
use crate::runtime::operation::{OperationId, OperationStatus};
use crate::runtime::SchedulePoint;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

#[derive(Default)]
struct LockState {
    holder: Option<OperationId>,
    waiters: Vec<OperationId>,
}

pub struct Mutex<T> {
    data: Arc<StdMutex<T>>,
    state: Arc<StdMutex<LockState>>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            data: Arc::new(StdMutex::new(value)),
            state: Arc::new(StdMutex::new(LockState::default())),
        }
    }

    fn try_acquire(&self, me: OperationId) -> bool {
        let mut state = self.state.lock().expect("lock state poisoned");
        if state.holder.is_none() {
            state.holder = Some(me);
            true
        } else {
            if !state.waiters.contains(&me) {
                state.waiters.push(me);
            }
            false
        }
    }

    /// Acquire the lock, blocking this operation while another holds it.
    /// Double-locking from the same operation deadlocks, and the scheduler
    /// reports it as such.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        crate::runtime::schedule_point_or_interrupt(SchedulePoint::Acquire);
        let me = crate::runtime::current_operation()
            .expect("sync::Mutex may only be locked from inside a verify() call");
        while !self.try_acquire(me) {
            crate::runtime::block_current(
                OperationStatus::BlockedOnResource,
                &[],
                SchedulePoint::Acquire,
            );
        }
        MutexGuard {
            inner: Some(self.data.lock().expect("model lock serializes access")),
            lock: self,
        }
    }

    /// Acquire the lock if it is free, without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        crate::runtime::schedule_point_or_interrupt(SchedulePoint::Acquire);
        let me = crate::runtime::current_operation()
            .expect("sync::Mutex may only be locked from inside a verify() call");
        if self.try_acquire(me) {
            Some(MutexGuard {
                inner: Some(self.data.lock().expect("model lock serializes access")),
                lock: self,
            })
        } else {
            // try_lock never waits; drop the waiter registration.
            let mut state = self.state.lock().expect("lock state poisoned");
            state.waiters.retain(|id| *id != me);
            None
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.try_lock() {
            Ok(guard) => f.debug_struct("Mutex").field("data", &*guard).finish(),
            Err(_) => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

pub struct MutexGuard<'a, T> {
    inner: Option<StdMutexGuard<'a, T>>,
    lock: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard already released")
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard already released")
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        drop(self.inner.take());
        let waiters = {
            let mut state = self.lock.state.lock().expect("lock state poisoned");
            state.holder = None;
            std::mem::take(&mut state.waiters)
        };
        ExecutionState::try_with(|state| {
            for id in &waiters {
                if let Some(op) = state.try_get_mut(*id) {
                    if op.status == OperationStatus::BlockedOnResource {
                        op.enable();
                    }
                }
            }
        });
        // Release is a scheduling point, but not while this drop runs as
        // part of an unwinding operation's teardown.
        if !std::thread::panicking() {
            crate::runtime::schedule_point_or_interrupt(SchedulePoint::Release);
        }
    }
}
