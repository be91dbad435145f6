//! Asynchronous task submission and deadline-bounded execution.
//!
//! This module provides:
//! - WorkerPool, a shared bounded pool handing out TaskHandles
//! - run_with_timeout / run_blocking_with_timeout, which abandon the wait
//!   (never the work) once a deadline passes

mod guard;
mod pool;

pub use guard::{run_blocking_with_timeout, run_with_timeout, Guarded};
pub use pool::{TaskHandle, TaskMeta, TaskState, WorkerPool, DEFAULT_POOL_SIZE};
