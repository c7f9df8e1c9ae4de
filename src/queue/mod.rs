//! Concurrency-bounded task queue
//!
//! This module provides the dispatch gate for per-URL pipelines:
//!
//! - `task`: task lifecycle types and the boxed operation type
//! - `task_queue`: the queue itself, with a concurrency cap, an independent
//!   start-rate limit, priority dispatch, and bounded settled-task history

mod task;
mod task_queue;

pub use task::{task_op, TaskOp, TaskRecord, TaskSpec, TaskStatus};
pub use task_queue::{QueueError, QueueOptions, QueueStatus, TaskHandle, TaskQueue};
