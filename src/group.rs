//! # Task groups.
//!
//! A [`TaskGroup`] aggregates related tasks behind a shared parent context
//! and group-level notifications:
//!
//! - Added tasks get the group context as their context's parent.
//! - Every task transition re-checks group completion (all tasks terminal)
//!   and any-failure (at least one `Failed`).
//! - [`TaskGroup::run_and_wait`] runs everything and waits for all-terminal
//!   or a budget, stopping the group on timeout.
//!
//! ## Rules
//! - Group callbacks are captured under the lock and invoked after release.
//! - Callbacks may fire more than once while their condition holds; waiters
//!   must tolerate duplicate notifications.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use crate::context::TaskContext;
use crate::error::{GroupError, TaskError};
use crate::logging::{self, LoggerRef};
use crate::tasks::{Task, TaskState};

type CompletedCallback = Arc<dyn Fn() + Send + Sync>;
type FailedCallback = Arc<dyn Fn(&[Task]) + Send + Sync>;

struct GroupInner {
    name: String,
    logger: LoggerRef,
    context: TaskContext,
    tasks: Mutex<Vec<Task>>,
    on_all_completed: Mutex<Option<CompletedCallback>>,
    on_any_failed: Mutex<Option<FailedCallback>>,
}

/// Aggregate of tasks sharing one parent context.
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

impl TaskGroup {
    /// Creates an empty group; a `None` logger resolves through the default
    /// factory.
    pub fn new(name: impl Into<String>, logger: Option<LoggerRef>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                logger: logging::resolve(logger),
                context: TaskContext::new(),
                tasks: Mutex::new(Vec::new()),
                on_all_completed: Mutex::new(None),
                on_any_failed: Mutex::new(None),
            }),
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The shared context every member's context chains to.
    pub fn context(&self) -> TaskContext {
        self.inner.context.clone()
    }

    /// Stores one entry in the shared context.
    pub fn set_context_value(
        &self,
        key: impl Into<String>,
        value: impl std::any::Any + Send + Sync,
    ) {
        self.inner.context.set(key, value);
    }

    /// Reads one entry from the shared context.
    pub fn context_value(&self, key: &str) -> Option<crate::CtxValue> {
        self.inner.context.get(key)
    }

    /// Adds a task: chains its context to the group context and subscribes
    /// the group-completion check to its transitions.
    pub fn add_task(&self, task: Task) -> &Self {
        self.inner.tasks.lock().unwrap().push(task.clone());
        task.context().set_parent(self.inner.context.clone());

        let group = Arc::downgrade(&self.inner);
        task.subscribe_state(Arc::new(move |_old, new: TaskState| {
            if !new.is_terminal() {
                return;
            }
            if let Some(inner) = group.upgrade() {
                check_group_completion(&inner);
            }
        }));
        self
    }

    /// Adds several tasks.
    pub fn add_tasks(&self, tasks: impl IntoIterator<Item = Task>) -> &Self {
        for task in tasks {
            self.add_task(task);
        }
        self
    }

    /// Starts every task in the group.
    pub async fn run_all(&self) {
        self.inner.logger.info(format_args!(
            "starting all tasks in group: {}",
            self.inner.name
        ));
        for task in self.snapshot() {
            task.run().await;
        }
    }

    /// Stops every task in the group.
    pub fn stop_all(&self) {
        self.inner.logger.info(format_args!(
            "stopping all tasks in group: {}",
            self.inner.name
        ));
        for task in self.snapshot() {
            task.stop();
        }
    }

    /// Counts by state: `(total, running, completed, failed)`.
    pub fn group_stats(&self) -> (usize, usize, usize, usize) {
        let tasks = self.snapshot();
        let total = tasks.len();
        let mut running = 0;
        let mut completed = 0;
        let mut failed = 0;
        for task in &tasks {
            match task.state() {
                TaskState::Running => running += 1,
                TaskState::Completed => completed += 1,
                TaskState::Failed => failed += 1,
                _ => {}
            }
        }
        (total, running, completed, failed)
    }

    /// Installs the all-completed callback; fires immediately when the group
    /// is already all-terminal (an empty group is trivially complete).
    pub fn on_all_completed(&self, callback: impl Fn() + Send + Sync + 'static) -> &Self {
        let callback: CompletedCallback = Arc::new(callback);
        *self.inner.on_all_completed.lock().unwrap() = Some(Arc::clone(&callback));
        if all_terminal(&self.snapshot()) {
            callback();
        }
        self
    }

    /// Installs the any-failed callback; fires immediately when failures
    /// already exist.
    pub fn on_any_failed(&self, callback: impl Fn(&[Task]) + Send + Sync + 'static) -> &Self {
        let callback: FailedCallback = Arc::new(callback);
        *self.inner.on_any_failed.lock().unwrap() = Some(Arc::clone(&callback));
        let failed = failed_tasks(&self.snapshot());
        if !failed.is_empty() {
            callback(&failed);
        }
        self
    }

    /// Runs every task and waits for the whole group to reach terminal
    /// states.
    ///
    /// On success returns the first failure as [`GroupError::TaskFailed`]
    /// (or `Ok` when none failed); on budget exhaustion stops the group and
    /// returns [`GroupError::Timeout`].
    pub async fn run_and_wait(&self, timeout: Duration) -> Result<(), GroupError> {
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let first_failure: Arc<Mutex<Option<GroupError>>> = Arc::new(Mutex::new(None));

        self.on_all_completed(move || {
            let _ = done_tx.try_send(());
        });
        let failure_slot = Arc::clone(&first_failure);
        self.on_any_failed(move |failed: &[Task]| {
            let Some(first) = failed.first() else {
                return;
            };
            let mut slot = failure_slot.lock().unwrap();
            if slot.is_none() {
                let error = first
                    .last_error()
                    .unwrap_or_else(|| Arc::new(TaskError::fail("unknown failure")));
                *slot = Some(GroupError::TaskFailed {
                    task: first.name().to_string(),
                    error,
                });
            }
        });

        self.run_all().await;

        let budget = time::sleep(timeout);
        tokio::pin!(budget);
        tokio::select! {
            _ = done_rx.recv() => {
                match first_failure.lock().unwrap().take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            _ = &mut budget => {
                self.stop_all();
                Err(GroupError::Timeout {
                    group: self.inner.name.clone(),
                    timeout,
                })
            }
        }
    }

    fn snapshot(&self) -> Vec<Task> {
        self.inner.tasks.lock().unwrap().clone()
    }
}

fn all_terminal(tasks: &[Task]) -> bool {
    tasks.iter().all(|t| t.state().is_terminal())
}

fn failed_tasks(tasks: &[Task]) -> Vec<Task> {
    tasks
        .iter()
        .filter(|t| t.state() == TaskState::Failed)
        .cloned()
        .collect()
}

/// Re-checks the group conditions after a member transition.
///
/// Callbacks are captured under their locks and invoked after release.
fn check_group_completion(inner: &Arc<GroupInner>) {
    let tasks: Vec<Task> = inner.tasks.lock().unwrap().clone();

    let failed = failed_tasks(&tasks);
    if !failed.is_empty() {
        let callback = inner.on_any_failed.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(&failed);
        }
    }

    if all_terminal(&tasks) {
        let callback = inner.on_all_completed.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}
