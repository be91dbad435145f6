//! Fan-out and pipeline orchestration.
//!
//! Orchestrators return the receiving half of an unbounded queue. Results
//! arrive in completion order, each wrapped in a [`Guarded`](crate::executor::Guarded)
//! so timeouts and failures remain visible, followed by control markers.

mod fanout;
mod message;
mod pipeline;

pub use fanout::{FanOut, TaskCallback, DEFAULT_MAX_WORKERS, DEFAULT_TASK_TIMEOUT};
pub use message::{
    collect_items, drain_all, stage_channel, StageMessage, StageReceiver, StageSender,
};
pub use pipeline::Pipeline;
