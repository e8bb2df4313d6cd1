//! # Topology helpers.
//!
//! Shorthand constructors for common task arrangements:
//!
//! - [`sequence`] — `t1 ← t2 ← … ← tn` dependency chain.
//! - [`parallel`] — a no-op join task downstream of N parallel tasks.
//! - [`chain_tasks`] — post-hook context hand-off along a pipeline.
//! - [`run_after`], [`retryable_task`], [`task_with_context_map`] — trivial
//!   constructors.

use std::collections::HashMap;
use std::future::Future;

use crate::context::{CtxValue, JobContext, TaskContext};
use crate::error::TaskError;
use crate::policies::RetryPolicyRef;
use crate::tasks::Task;

/// Chains `tasks` so each depends on its predecessor.
pub fn sequence(tasks: &[Task]) -> Result<(), TaskError> {
    for pair in tasks.windows(2) {
        pair[1].depends_on([pair[0].clone()])?;
    }
    Ok(())
}

/// Creates a no-op join task depending on all of `tasks`.
///
/// The join completes once every input has completed, giving downstream
/// tasks a single edge to hang off. Returns `None` for an empty input.
pub fn parallel(name: &str, tasks: &[Task]) -> Option<Task> {
    if tasks.is_empty() {
        return None;
    }
    let join = Task::builder(format!("{name}-join"))
        .with_job(|_ctx| async { Ok(()) })
        .build();
    // The join is fresh; no edge to it can exist yet, so no cycle.
    let _ = join.depends_on(tasks.iter().cloned());
    Some(join)
}

/// Installs post-hooks that copy each task's context into the next task's
/// context when it finishes an iteration.
///
/// Unlike a dependency edge this overwrites existing keys: a pipeline stage
/// owns the data it hands downstream.
pub fn chain_tasks(tasks: &[Task]) {
    for pair in tasks.windows(2) {
        let current = pair[0].downgrade();
        let next = pair[1].downgrade();
        pair[0].chain_post_hook(move || {
            let (Some(current), Some(next)) = (current.upgrade(), next.upgrade()) else {
                return;
            };
            current.context().copy_to(&next.context(), true);
        });
    }
}

/// Installs `dependencies` as predecessors of `task` and returns it.
pub fn run_after(
    task: Task,
    dependencies: impl IntoIterator<Item = Task>,
) -> Result<Task, TaskError> {
    task.depends_on(dependencies)?;
    Ok(task)
}

/// A task running `job` under the given retry policy.
pub fn retryable_task<F, Fut>(name: impl Into<String>, job: F, policy: RetryPolicyRef) -> Task
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Task::builder(name)
        .with_job(job)
        .with_retry_policy(policy)
        .build()
}

/// A task whose job receives a flattened snapshot of its context.
pub fn task_with_context_map<F, Fut>(name: impl Into<String>, job: F) -> Task
where
    F: Fn(JobContext, HashMap<String, CtxValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Task::builder(name)
        .with_context(TaskContext::new())
        .with_map_context_job(job)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Task {
        Task::builder(name).with_job(|_ctx| async { Ok(()) }).build()
    }

    #[test]
    fn sequence_installs_linear_edges() {
        let a = noop("a");
        let b = noop("b");
        let c = noop("c");
        sequence(&[a.clone(), b.clone(), c.clone()]).unwrap();

        assert!(a.dependencies().is_empty());
        assert_eq!(b.dependencies().len(), 1);
        assert_eq!(b.dependencies()[0].id(), a.id());
        assert_eq!(c.dependencies()[0].id(), b.id());
    }

    #[test]
    fn parallel_join_depends_on_all() {
        let tasks: Vec<Task> = (0..3).map(|i| noop(&format!("p{i}"))).collect();
        let join = parallel("stage", &tasks).unwrap();
        assert_eq!(join.name(), "stage-join");
        assert_eq!(join.dependencies().len(), 3);
        assert!(parallel("empty", &[]).is_none());
    }

    #[test]
    fn run_after_returns_the_dependent() {
        let a = noop("a");
        let b = run_after(noop("b"), [a.clone()]).unwrap();
        assert_eq!(b.dependencies()[0].id(), a.id());
    }
}
