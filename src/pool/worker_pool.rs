//! # The worker pool.
//!
//! A fixed set of workers plus one scheduler loop, connected by a bounded
//! hand-off channel:
//!
//! ```text
//! submit() ──► PriorityQueue ──► scheduler ──► [hand-off, 2·size] ──► worker 0..N
//!                  ▲                │                                    │
//!                  │             notify / 100ms floor              task.run()
//!                  └── priority read once                                │
//!                                                    await first terminal transition
//! ```
//!
//! ## Rules
//! - `start()` / `stop()` are idempotent; `submit()` after `stop()` warns and
//!   drops.
//! - Priority is honored at dequeue time; equal priorities drain in an
//!   unspecified order.
//! - On pool cancellation every in-flight task is stopped via its own token.
//! - Task bookkeeping is keyed by [`TaskId`], so name collisions never
//!   overwrite each other; name lookup returns the first match.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::logging::{self, LoggerRef};
use crate::pool::info::{PoolStats, TaskInfo, TaskStatus};
use crate::queue::PriorityQueue;
use crate::tasks::{Task, TaskId, TaskState};

/// Invoked when a worker picks a task up.
pub type TaskStartCallback = Arc<dyn Fn(&Task) + Send + Sync>;

/// Invoked when the pool records a task's terminal status.
pub type TaskFinishCallback = Arc<dyn Fn(&Task, Option<&crate::TaskError>) + Send + Sync>;

struct Lifecycle {
    running: bool,
    tx: Option<mpsc::Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

struct PoolInner {
    size: usize,
    logger: LoggerRef,
    queue: PriorityQueue,
    notify: Notify,
    token: CancellationToken,
    tasks: DashMap<TaskId, TaskInfo>,
    completed: AtomicU64,
    failed: AtomicU64,
    on_task_start: Mutex<Option<TaskStartCallback>>,
    on_task_finish: Mutex<Option<TaskFinishCallback>>,
    lifecycle: Mutex<Lifecycle>,
}

/// Fixed-size pool of workers draining a priority queue.
///
/// ## Example
/// ```rust,no_run
/// use taskling::{Task, WorkerPool};
///
/// # async fn demo() {
/// let pool = WorkerPool::new(4, None);
/// pool.start();
///
/// pool.submit(
///     Task::builder("ingest")
///         .with_job(|_ctx| async { Ok(()) })
///         .build(),
/// );
///
/// // ...
/// pool.stop().await;
/// # }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a stopped pool with `size` workers.
    ///
    /// `size == 0` coerces to 1; a `None` logger resolves through the
    /// default factory.
    pub fn new(size: usize, logger: Option<LoggerRef>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                size: size.max(1),
                logger: logging::resolve(logger),
                queue: PriorityQueue::new(),
                notify: Notify::new(),
                token: CancellationToken::new(),
                tasks: DashMap::new(),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                on_task_start: Mutex::new(None),
                on_task_finish: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle {
                    running: false,
                    tx: None,
                    handles: Vec::new(),
                }),
            }),
        }
    }

    /// Installs the task-start callback.
    pub fn with_task_start_callback(self, cb: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        *self.inner.on_task_start.lock().unwrap() = Some(Arc::new(cb));
        self
    }

    /// Installs the task-finish callback.
    pub fn with_task_finish_callback(
        self,
        cb: impl Fn(&Task, Option<&crate::TaskError>) + Send + Sync + 'static,
    ) -> Self {
        *self.inner.on_task_finish.lock().unwrap() = Some(Arc::new(cb));
        self
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Whether the pool is accepting submissions.
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().unwrap().running
    }

    /// Spawns the scheduler loop and the workers. Idempotent.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut lc = self.inner.lifecycle.lock().unwrap();
        if lc.running {
            return;
        }
        self.inner.logger.info(format_args!(
            "starting worker pool with {} workers",
            self.inner.size
        ));
        lc.running = true;

        let (tx, rx) = mpsc::channel::<Task>(self.inner.size * 2);
        lc.tx = Some(tx.clone());
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        lc.handles
            .push(tokio::spawn(scheduler_loop(Arc::clone(&self.inner), tx)));
        for worker_id in 0..self.inner.size {
            lc.handles.push(tokio::spawn(worker_loop(
                Arc::clone(&self.inner),
                worker_id,
                Arc::clone(&rx),
            )));
        }
    }

    /// Cancels the pool, closes the hand-off channel and joins every worker.
    /// Idempotent.
    pub async fn stop(&self) {
        let handles = {
            let mut lc = self.inner.lifecycle.lock().unwrap();
            if !lc.running {
                return;
            }
            self.inner.logger.info(format_args!("stopping worker pool"));
            lc.running = false;
            self.inner.token.cancel();
            lc.tx = None; // closes the hand-off channel
            std::mem::take(&mut lc.handles)
        };
        self.inner.notify.notify_waiters();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Queues a task for execution.
    ///
    /// After `stop()` this is a no-op with a warning; the task never runs.
    pub fn submit(&self, task: Task) {
        {
            let lc = self.inner.lifecycle.lock().unwrap();
            if !lc.running {
                self.inner.logger.warn(format_args!(
                    "worker pool is stopped, cannot submit task: {}",
                    task.name()
                ));
                return;
            }
        }

        self.inner
            .tasks
            .insert(task.id(), TaskInfo::pending(task.clone()));
        self.inner.logger.debug(format_args!(
            "task submitted to worker pool: {} (priority: {:?})",
            task.name(),
            task.priority()
        ));
        self.inner.queue.enqueue(task);
        self.inner.notify.notify_one();
    }

    /// Bookkeeping for the first submission named `name`, if any.
    pub fn task_info(&self, name: &str) -> Option<TaskInfo> {
        self.inner
            .tasks
            .iter()
            .find(|entry| entry.task.name() == name)
            .map(|entry| entry.value().clone())
    }

    /// Bookkeeping for the submission with the given stable id.
    pub fn task_info_by_id(&self, id: TaskId) -> Option<TaskInfo> {
        self.inner.tasks.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every submission's bookkeeping.
    pub fn all_tasks_info(&self) -> Vec<TaskInfo> {
        self.inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Aggregate counters: pending, completed, failed.
    pub fn stats(&self) -> PoolStats {
        let pending = self
            .inner
            .tasks
            .iter()
            .filter(|entry| entry.status == TaskStatus::Pending)
            .count();
        PoolStats {
            pending,
            completed: self.inner.completed.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }
}

/// Moves tasks from the priority queue into the hand-off channel.
///
/// Sleeps on empty queue until a submit notification or the 100 ms floor,
/// whichever comes first; exits on pool cancellation.
async fn scheduler_loop(inner: Arc<PoolInner>, tx: mpsc::Sender<Task>) {
    inner.logger.debug(format_args!("scheduler started"));

    loop {
        if inner.token.is_cancelled() {
            inner
                .logger
                .debug(format_args!("scheduler stopped: pool canceled"));
            return;
        }

        match inner.queue.dequeue() {
            Some(task) => {
                let name = task.name().to_string();
                let priority = task.priority();
                tokio::select! {
                    _ = inner.token.cancelled() => return,
                    sent = tx.send(task) => {
                        if sent.is_err() {
                            return;
                        }
                        inner.logger.debug(format_args!(
                            "task scheduled: {name} (priority: {priority:?})"
                        ));
                    }
                }
            }
            None => {
                let floor = time::sleep(Duration::from_millis(100));
                tokio::pin!(floor);
                tokio::select! {
                    _ = inner.token.cancelled() => return,
                    _ = inner.notify.notified() => {}
                    _ = &mut floor => {}
                }
            }
        }
    }
}

/// One worker: receive, execute, repeat until shutdown.
async fn worker_loop(
    inner: Arc<PoolInner>,
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
) {
    inner
        .logger
        .debug(format_args!("worker {worker_id} started"));

    loop {
        let task = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = inner.token.cancelled() => {
                    inner.logger.debug(format_args!(
                        "worker {worker_id} stopped: pool canceled"
                    ));
                    return;
                }
                received = guard.recv() => match received {
                    Some(task) => task,
                    None => {
                        inner.logger.debug(format_args!(
                            "worker {worker_id} stopped: hand-off channel closed"
                        ));
                        return;
                    }
                },
            }
        };

        execute_task(&inner, worker_id, task).await;
    }
}

/// Runs one task to its terminal transition, recording bookkeeping and
/// invoking the lifecycle callbacks.
async fn execute_task(inner: &Arc<PoolInner>, worker_id: usize, task: Task) {
    inner.logger.debug(format_args!(
        "worker {worker_id} executing task: {}",
        task.name()
    ));

    if let Some(mut info) = inner.tasks.get_mut(&task.id()) {
        info.status = TaskStatus::Running;
        info.worker_id = Some(worker_id);
        info.started_at = Some(SystemTime::now());
    }
    let start_cb = inner.on_task_start.lock().unwrap().clone();
    if let Some(cb) = start_cb {
        cb(&task);
    }

    // Subscribe before run() so no terminal transition is missed.
    let (done_tx, mut done_rx) = mpsc::channel::<TaskState>(4);
    task.subscribe_state(Arc::new(move |_old, new| {
        if new.is_terminal() {
            let _ = done_tx.try_send(new);
        }
    }));

    task.run().await;

    // A task that was already terminal never transitions again.
    let observed = task.state();
    let terminal = if observed.is_terminal() {
        Some(observed)
    } else {
        tokio::select! {
            _ = inner.token.cancelled() => None,
            state = done_rx.recv() => state,
        }
    };

    match terminal {
        Some(state) => {
            let err = task.last_error();
            let status = match state {
                TaskState::Completed => {
                    inner.completed.fetch_add(1, Ordering::SeqCst);
                    TaskStatus::Completed
                }
                TaskState::Failed => {
                    inner.failed.fetch_add(1, Ordering::SeqCst);
                    TaskStatus::Failed
                }
                _ => TaskStatus::Cancelled,
            };
            if let Some(mut info) = inner.tasks.get_mut(&task.id()) {
                info.status = status;
                info.finished_at = Some(SystemTime::now());
                if status == TaskStatus::Failed {
                    info.error = err.clone();
                }
            }
            let finish_cb = inner.on_task_finish.lock().unwrap().clone();
            if let Some(cb) = finish_cb {
                let failed = (status == TaskStatus::Failed).then_some(err).flatten();
                cb(&task, failed.as_deref());
            }
            inner.logger.debug(format_args!(
                "worker {worker_id} finished task: {} ({status:?})",
                task.name()
            ));
        }
        None => {
            // Pool shutdown: stop the in-flight task via its own token.
            task.stop();
            if let Some(mut info) = inner.tasks.get_mut(&task.id()) {
                info.status = TaskStatus::Cancelled;
                info.finished_at = Some(SystemTime::now());
            }
            inner.logger.debug(format_args!(
                "worker {worker_id} canceled task {} due to pool shutdown",
                task.name()
            ));
        }
    }
}
