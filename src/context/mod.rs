//! # Context data flowing between tasks.
//!
//! Two kinds of context live here:
//!
//! - [`TaskContext`] — a hierarchical, concurrency-safe keyed map attached to
//!   a task (or shared by a group) and propagated along dependency edges.
//! - [`JobContext`] — the per-attempt value handed to a running job: the
//!   attempt's cancellation token plus a handle back to the owning task.

mod job_context;
mod task_context;

pub use job_context::JobContext;
pub use task_context::{CtxValue, TaskContext, Validator};
