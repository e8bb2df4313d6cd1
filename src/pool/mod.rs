//! # Bounded-concurrency execution.
//!
//! [`WorkerPool`] dispatches submitted tasks from a priority queue to a fixed
//! set of workers, tracking per-task status and exposing lifecycle callbacks.

mod info;
mod worker_pool;

pub use info::{PoolStats, TaskInfo, TaskStatus};
pub use worker_pool::{TaskFinishCallback, TaskStartCallback, WorkerPool};
