//! The re-entrant lock every container guards its state with.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;

/// Container state behind a re-entrant mutex.
///
/// The owning thread may lock again while it already holds the lock, so a
/// user callback invoked under the lock can call back into the same
/// container. State is only borrowed inside [`with`](Self::with); never call
/// user code from inside that closure.
pub(crate) struct ContainerLock<T> {
    cell: ReentrantMutex<RefCell<T>>,
}

impl<T> ContainerLock<T> {
    pub(crate) fn new(state: T) -> Self {
        Self {
            cell: ReentrantMutex::new(RefCell::new(state)),
        }
    }

    /// Locks and runs `f` with exclusive access to the state.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let guard = self.cell.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Locks without borrowing; keeps other threads out across several
    /// [`with`](Self::with) calls and any callbacks run between them.
    pub(crate) fn hold(&self) -> ReentrantMutexGuard<'_, RefCell<T>> {
        self.cell.lock()
    }
}
