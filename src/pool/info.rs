//! # Per-task pool bookkeeping.

use std::sync::Arc;
use std::time::SystemTime;

use crate::error::TaskError;
use crate::tasks::Task;

/// Pool-side status of a submitted task.
///
/// Distinct from [`TaskState`](crate::TaskState): this is the pool's view of
/// one submission, not the task's own lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued, not yet handed to a worker.
    Pending,
    /// A worker is executing (or awaiting) the task.
    Running,
    /// The task reached `Completed`.
    Completed,
    /// The task reached `Failed`.
    Failed,
    /// The task was cancelled, or the pool shut down around it.
    Cancelled,
}

/// Snapshot of one submission's bookkeeping.
#[derive(Clone)]
pub struct TaskInfo {
    /// The submitted task.
    pub task: Task,
    /// Pool-side status.
    pub status: TaskStatus,
    /// Index of the executing worker, once running.
    pub worker_id: Option<usize>,
    /// When a worker picked the task up.
    pub started_at: Option<SystemTime>,
    /// When the pool recorded a terminal status.
    pub finished_at: Option<SystemTime>,
    /// Terminal error, when the task failed.
    pub error: Option<Arc<TaskError>>,
}

impl TaskInfo {
    pub(crate) fn pending(task: Task) -> Self {
        Self {
            task,
            status: TaskStatus::Pending,
            worker_id: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// Aggregate pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Submissions still waiting for a worker.
    pub pending: usize,
    /// Tasks that reached `Completed` under this pool.
    pub completed: u64,
    /// Tasks that reached `Failed` under this pool.
    pub failed: u64,
}
