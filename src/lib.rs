//! # taskling
//!
//! **Taskling** is a lightweight in-process task scheduling engine: it takes
//! user-supplied units of work, each configured with timing, retry,
//! dependency and lifecycle policy, and runs them under a bounded-concurrency
//! worker pool with strict ordering and cancellation semantics.
//!
//! ## Features
//!
//! | Area             | Description                                                    | Key types / traits                          |
//! |------------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Tasks**        | Cancellable state machines with retries, timeouts and hooks.   | [`Task`], [`TaskBuilder`], [`Job`], [`JobFn`] |
//! | **Worker pool**  | Fixed-size workers draining a thread-safe priority queue.      | [`WorkerPool`], [`PriorityQueue`]           |
//! | **Dependencies** | Edge-triggered gating with context hand-off along edges.       | [`Task::depends_on`], [`sequence`], [`parallel`] |
//! | **Context**      | Hierarchical keyed map flowing between dependent tasks.        | [`TaskContext`], [`JobContext`]             |
//! | **Retry**        | Pluggable delay + retryability policies.                       | [`RetryPolicy`], [`FixedDelayPolicy`], [`ExponentialBackoffPolicy`] |
//! | **Groups**       | Aggregate run/stop with completion and failure notifications.  | [`TaskGroup`]                               |
//! | **Errors**       | Typed errors for tasks, groups and context validation.         | [`TaskError`], [`GroupError`], [`ContextError`] |
//! | **Logging**      | Levelled sink injected everywhere; `tracing` by default.       | [`Logger`], [`default_logger`]              |
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use taskling::{FixedDelayPolicy, Priority, Task, WorkerPool};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::new(4, None);
//!     pool.start();
//!
//!     let fetch = Task::builder("fetch")
//!         .with_job(|ctx| async move {
//!             if ctx.is_cancelled() {
//!                 return Err(taskling::TaskError::Canceled);
//!             }
//!             ctx.context().set("payload", "hello".to_string());
//!             Ok(())
//!         })
//!         .with_timeout(Duration::from_secs(5))
//!         .with_retry_policy(std::sync::Arc::new(FixedDelayPolicy::new(
//!             Duration::from_millis(250),
//!             3,
//!         )))
//!         .with_priority(Priority::High)
//!         .build();
//!
//!     let report = Task::builder("report")
//!         .with_context_job(|_ctx, task_ctx| async move {
//!             let payload = task_ctx.get_string("payload").unwrap_or_default();
//!             println!("got: {payload}");
//!             Ok(())
//!         })
//!         .build();
//!     report.depends_on([fetch.clone()]).unwrap();
//!
//!     pool.submit(report);
//!     pool.submit(fetch);
//!
//!     tokio::time::sleep(Duration::from_millis(200)).await;
//!     pool.stop().await;
//! }
//! ```

mod chain;
mod context;
mod error;
mod group;
mod logging;
mod policies;
mod pool;
mod queue;
mod tasks;

// ---- Public re-exports ----

pub use chain::{chain_tasks, parallel, retryable_task, run_after, sequence, task_with_context_map};
pub use context::{CtxValue, JobContext, TaskContext, Validator};
pub use error::{ContextError, GroupError, TaskError};
pub use group::TaskGroup;
pub use logging::{default_logger, FuncLogger, LogLevel, Logger, LoggerRef, NopLogger, TracingLogger};
pub use policies::{
    no_retry, progressive_retry, retry_on_network_error, simple_retry, with_retry_predicate,
    ExponentialBackoffPolicy, FixedDelayPolicy, RetryPolicy, RetryPolicyRef, RetryPredicate,
};
pub use pool::{PoolStats, TaskFinishCallback, TaskInfo, TaskStartCallback, TaskStatus, WorkerPool};
pub use queue::PriorityQueue;
pub use tasks::{
    BoxJobFuture, ContextClean, ContextPrep, ErrorHandler, Hook, Job, JobFn, JobRef, JobResult,
    MetricCollector, Priority, RecoverHook, SatisfiedCallback, StateListener, Task, TaskBuilder,
    TaskConfig, TaskId, TaskState,
};
