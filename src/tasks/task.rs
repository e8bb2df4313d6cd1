//! # The task state machine.
//!
//! A [`Task`] wraps a user [`Job`](crate::Job) with lifecycle, cancellation,
//! retry, timeout, hook and dependency policy. Handles are cheap clones over
//! shared state; any number of holders may observe and control one task.
//!
//! ## Run flow
//! ```text
//! run()
//!   ├─► Running already?            → warn, return
//!   ├─► terminal state?             → warn, return (reset() re-opens)
//!   ├─► dependencies unmet?         → install on-all-satisfied → re-run, return
//!   ├─► Idle → Running
//!   └─► body (inline when sync, scheduler-owned otherwise)
//!         ├─► panic barrier (catch_unwind)
//!         ├─► context prep
//!         ├─► startup delay (cancellable)
//!         └─► loop:
//!               ├─► cancelled?      → Cancelled
//!               ├─► paused?         → wait (cancellable)
//!               ├─► pre-hook
//!               ├─► attempt cycle   → job × (max_retries + 1), timeout per
//!               │                     attempt, metric per attempt, delays
//!               │                     cancellable
//!               ├─► error?          → last_error, error handler,
//!               │                     Failed when cancel_on_failure
//!               ├─► post-hook
//!               ├─► max runs hit?   → Completed (token cancelled)
//!               ├─► no interval?    → Completed
//!               └─► sleep interval (cancellable)
//! ```
//!
//! ## Rules
//! - At most one body executes per task; `run()` while Running is a no-op.
//! - Transitions are delivered `(old, new)` to the observer list in order,
//!   never concurrently for the same task. Listeners must not synchronously
//!   drive a transition of the **same** task; spawn instead.
//! - `run_count` only moves backwards across an explicit [`Task::reset`].
//! - Cancellation wins over failure classification: an error returned after
//!   the token fired drives `Cancelled`, not `Failed`, and skips the error
//!   handler.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::context::{CtxValue, JobContext, TaskContext};
use crate::error::TaskError;
use crate::logging::{self, LoggerRef};
use crate::policies::RetryPolicyRef;
use crate::tasks::config::{
    ContextClean, ContextPrep, ErrorHandler, Hook, MetricCollector, RecoverHook, TaskConfig,
};
use crate::tasks::job::{JobRef, JobResult};
use crate::tasks::state::{Priority, TaskState};

/// Stable process-wide task identifier.
///
/// Names are display labels and may collide; the id never does.
pub type TaskId = u64;

/// Observer of state transitions; receives `(old, new)`.
pub type StateListener = Arc<dyn Fn(TaskState, TaskState) + Send + Sync>;

/// Callback fired when every dependency has completed.
pub type SatisfiedCallback = Arc<dyn Fn() + Send + Sync>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

struct StateCell {
    state: TaskState,
    token: CancellationToken,
    last_error: Option<Arc<TaskError>>,
    last_run_time: Option<SystemTime>,
}

#[derive(Default)]
struct DepState {
    predecessors: Vec<Task>,
    satisfied: HashMap<TaskId, bool>,
    on_all_satisfied: Option<SatisfiedCallback>,
    /// Guards exactly-once delivery per satisfaction transition.
    notified: bool,
}

struct Inner {
    id: TaskId,
    name: String,
    job: JobRef,
    timeout: Duration,
    interval: Duration,
    max_runs: u64,
    retry_times: u32,
    startup_delay: Duration,
    priority: Priority,
    cancel_on_failure: bool,
    sync_exec: bool,
    logger: LoggerRef,
    retry_policy: Option<RetryPolicyRef>,
    metric_collector: Option<MetricCollector>,
    recover_hook: Option<RecoverHook>,
    context_prep: Option<ContextPrep>,
    context_clean: Option<ContextClean>,

    // Hooks are chainable at runtime (the pool and topology helpers append).
    pre_hook: Mutex<Option<Hook>>,
    post_hook: Mutex<Option<Hook>>,
    error_handler: Mutex<Option<ErrorHandler>>,

    run_count: AtomicU64,
    state: Mutex<StateCell>,
    listeners: Mutex<Vec<StateListener>>,
    /// Serializes listener delivery so one task's transitions never overlap.
    notify_lock: Mutex<()>,
    paused: watch::Sender<bool>,
    deps: Mutex<DepState>,
    context: Mutex<Option<TaskContext>>,
}

/// Cheaply cloneable handle to one scheduled unit of work.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

/// Non-owning task handle; breaks `Arc` cycles in long-lived callbacks.
#[derive(Clone)]
pub(crate) struct WeakTask(Weak<Inner>);

impl WeakTask {
    pub(crate) fn upgrade(&self) -> Option<Task> {
        self.0.upgrade().map(|inner| Task { inner })
    }
}

impl Task {
    /// Starts a [`TaskBuilder`](crate::TaskBuilder) for a task named `name`.
    pub fn builder(name: impl Into<String>) -> crate::tasks::TaskBuilder {
        crate::tasks::TaskBuilder::new(name)
    }

    /// Materializes a task from a config value.
    ///
    /// # Panics
    /// When `config.job` is `None` — running a job-less task is a programmer
    /// error and must fail fast.
    pub(crate) fn from_config(config: TaskConfig) -> Task {
        let TaskConfig {
            name,
            job,
            timeout,
            interval,
            max_runs,
            retry_times,
            retry_policy,
            startup_delay,
            priority,
            cancel_on_failure,
            sync_exec,
            logger,
            pre_hook,
            post_hook,
            error_handler,
            recover_hook,
            metric_collector,
            context_prep,
            context_clean,
            context,
            dependencies,
            state_listener,
        } = config;

        let Some(job) = job else {
            panic!("task '{name}' built without a job");
        };

        let (paused, _) = watch::channel(false);
        let task = Task {
            inner: Arc::new(Inner {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                name,
                job,
                timeout,
                interval,
                max_runs,
                retry_times,
                startup_delay,
                priority,
                cancel_on_failure,
                sync_exec,
                logger: logging::resolve(logger),
                retry_policy,
                metric_collector,
                recover_hook,
                context_prep,
                context_clean,
                pre_hook: Mutex::new(pre_hook),
                post_hook: Mutex::new(post_hook),
                error_handler: Mutex::new(error_handler),
                run_count: AtomicU64::new(0),
                state: Mutex::new(StateCell {
                    state: TaskState::Idle,
                    token: CancellationToken::new(),
                    last_error: None,
                    last_run_time: None,
                }),
                listeners: Mutex::new(Vec::new()),
                notify_lock: Mutex::new(()),
                paused,
                deps: Mutex::new(DepState::default()),
                context: Mutex::new(context),
            }),
        };

        if let Some(listener) = state_listener {
            task.subscribe_state(listener);
        }
        if !dependencies.is_empty() {
            // A freshly built task cannot be reachable from its predecessors,
            // so the cycle check cannot trip here.
            let _ = task.depends_on(dependencies);
        }
        task
    }

    // ---- observability ----

    pub(crate) fn downgrade(&self) -> WeakTask {
        WeakTask(Arc::downgrade(&self.inner))
    }

    /// Stable identifier, unique within the process.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Display name (not required unique).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.inner.state.lock().unwrap().state
    }

    /// Completed iterations since construction or the last reset.
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// The most recent iteration-final error, if any.
    pub fn last_error(&self) -> Option<Arc<TaskError>> {
        self.inner.state.lock().unwrap().last_error.clone()
    }

    /// Wall-clock time the last iteration started.
    pub fn last_run_time(&self) -> Option<SystemTime> {
        self.inner.state.lock().unwrap().last_run_time
    }

    // ---- context ----

    /// The task's context, created on first access.
    pub fn context(&self) -> TaskContext {
        self.inner
            .context
            .lock()
            .unwrap()
            .get_or_insert_with(TaskContext::new)
            .clone()
    }

    /// The context if one has been created or attached.
    pub(crate) fn try_context(&self) -> Option<TaskContext> {
        self.inner.context.lock().unwrap().clone()
    }

    /// Stores one context entry.
    pub fn set_context_value(
        &self,
        key: impl Into<String>,
        value: impl std::any::Any + Send + Sync,
    ) {
        self.context().set(key, value);
    }

    /// Reads one context entry.
    pub fn context_value(&self, key: &str) -> Option<CtxValue> {
        self.context().get(key)
    }

    // ---- state observation ----

    /// Appends a transition observer.
    ///
    /// Observers for one task run serially, in subscription order. An
    /// observer must not synchronously transition the same task.
    pub fn subscribe_state(&self, listener: StateListener) {
        self.inner.listeners.lock().unwrap().push(listener);
    }

    fn set_state(&self, new: TaskState) {
        let old = {
            let mut cell = self.inner.state.lock().unwrap();
            let old = cell.state;
            if old == new {
                return;
            }
            cell.state = new;
            old
        };
        self.notify_listeners(old, new);
    }

    /// Atomic Idle→Running transition; loses the race to a concurrent
    /// starter, terminal state or pause.
    fn try_start(&self) -> bool {
        let old = {
            let mut cell = self.inner.state.lock().unwrap();
            if cell.state != TaskState::Idle {
                return false;
            }
            cell.state = TaskState::Running;
            TaskState::Idle
        };
        self.notify_listeners(old, TaskState::Running);
        true
    }

    fn notify_listeners(&self, old: TaskState, new: TaskState) {
        let listeners: Vec<StateListener> = self.inner.listeners.lock().unwrap().clone();
        let _delivery = self.inner.notify_lock.lock().unwrap();
        for listener in &listeners {
            listener(old, new);
        }
    }

    // ---- hooks ----

    /// Appends to the pre-iteration hook chain.
    pub fn chain_pre_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        Self::chain_hook(&self.inner.pre_hook, Arc::new(hook));
    }

    /// Appends to the post-iteration hook chain.
    pub fn chain_post_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        Self::chain_hook(&self.inner.post_hook, Arc::new(hook));
    }

    /// Appends to the error-handler chain.
    pub fn chain_error_handler(&self, handler: impl Fn(&TaskError) + Send + Sync + 'static) {
        let mut slot = self.inner.error_handler.lock().unwrap();
        let next: ErrorHandler = Arc::new(handler);
        *slot = Some(match slot.take() {
            Some(prev) => Arc::new(move |err: &TaskError| {
                prev(err);
                next(err);
            }) as ErrorHandler,
            None => next,
        });
    }

    fn chain_hook(slot: &Mutex<Option<Hook>>, next: Hook) {
        let mut slot = slot.lock().unwrap();
        *slot = Some(match slot.take() {
            Some(prev) => Arc::new(move || {
                prev();
                next();
            }) as Hook,
            None => next,
        });
    }

    fn pre_hook(&self) -> Option<Hook> {
        self.inner.pre_hook.lock().unwrap().clone()
    }

    fn post_hook(&self) -> Option<Hook> {
        self.inner.post_hook.lock().unwrap().clone()
    }

    fn invoke_error_handler(&self, err: &TaskError) {
        let handler = self.inner.error_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }

    // ---- dependencies ----

    /// Appends non-duplicate predecessors and subscribes to their completion.
    ///
    /// When a predecessor completes, its context entries flow into this
    /// task's context (existing keys win) and the satisfaction map updates;
    /// once every entry is satisfied the on-all-satisfied callback fires,
    /// once per satisfaction transition.
    ///
    /// An edge that would close a cycle is rejected with
    /// [`TaskError::DependencyCycle`]; edges added before the offending one
    /// remain installed.
    pub fn depends_on(&self, tasks: impl IntoIterator<Item = Task>) -> Result<(), TaskError> {
        for dep in tasks {
            if dep.id() == self.id() || dep.reaches(self) {
                return Err(TaskError::DependencyCycle {
                    task: self.name().to_string(),
                    dependency: dep.name().to_string(),
                });
            }

            let added = {
                let mut ds = self.inner.deps.lock().unwrap();
                if ds.predecessors.iter().any(|p| p.id() == dep.id()) {
                    false
                } else {
                    ds.predecessors.push(dep.clone());
                    ds.satisfied.insert(dep.id(), false);
                    ds.notified = false;
                    true
                }
            };

            if added {
                // Weak captures keep the edge from forming an Arc cycle.
                let dependent = Arc::downgrade(&self.inner);
                let pred = Arc::downgrade(&dep.inner);
                dep.subscribe_state(Arc::new(move |_old, new| {
                    if new != TaskState::Completed {
                        return;
                    }
                    let (Some(di), Some(pi)) = (dependent.upgrade(), pred.upgrade()) else {
                        return;
                    };
                    let dependent = Task { inner: di };
                    let pred = Task { inner: pi };
                    dependent.absorb_dependency_context(&pred);
                    dependent.mark_dependency_completed(pred.id());
                }));
            }
        }
        Ok(())
    }

    /// Snapshot of the predecessor list.
    pub fn dependencies(&self) -> Vec<Task> {
        self.inner.deps.lock().unwrap().predecessors.clone()
    }

    /// Whether every predecessor has completed (trivially true when none).
    pub fn dependencies_met(&self) -> bool {
        let ds = self.inner.deps.lock().unwrap();
        ds.predecessors.is_empty() || ds.satisfied.values().all(|v| *v)
    }

    /// Installs the all-satisfied callback; fires immediately (and consumes
    /// the pending satisfaction transition) if dependencies are already met.
    pub fn on_dependencies_met(&self, callback: SatisfiedCallback) {
        let fire = {
            let mut ds = self.inner.deps.lock().unwrap();
            ds.on_all_satisfied = Some(Arc::clone(&callback));
            let met = ds.predecessors.is_empty() || ds.satisfied.values().all(|v| *v);
            if met && !ds.notified {
                ds.notified = true;
                true
            } else {
                false
            }
        };
        if fire {
            callback();
        }
    }

    /// Whether `self` transitively depends on `target`.
    fn reaches(&self, target: &Task) -> bool {
        if self.id() == target.id() {
            return true;
        }
        let preds = self.dependencies();
        preds.iter().any(|p| p.reaches(target))
    }

    fn absorb_dependency_context(&self, pred: &Task) {
        let Some(src) = pred.try_context() else {
            return;
        };
        src.copy_to(&self.context(), false);
    }

    fn mark_dependency_completed(&self, id: TaskId) {
        let callback = {
            let mut ds = self.inner.deps.lock().unwrap();
            if let Some(flag) = ds.satisfied.get_mut(&id) {
                *flag = true;
            }
            let met = !ds.predecessors.is_empty() && ds.satisfied.values().all(|v| *v);
            if met && !ds.notified {
                ds.notified = true;
                ds.on_all_satisfied.clone()
            } else {
                None
            }
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    // ---- lifecycle ----

    /// Starts the task.
    ///
    /// Returns immediately when asynchronous (the default); awaits the whole
    /// body when built `with_sync(true)`. No-ops (with a warning) while
    /// Running, Paused, or in a terminal state; with unmet dependencies it
    /// arms an on-all-satisfied re-run instead.
    pub fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match self.state() {
                TaskState::Running => {
                    self.inner.logger.warn(format_args!(
                        "[{}] task is already running",
                        self.name()
                    ));
                    return;
                }
                TaskState::Paused => {
                    self.inner.logger.warn(format_args!(
                        "[{}] task is paused; resume() it instead",
                        self.name()
                    ));
                    return;
                }
                s if s.is_terminal() => {
                    self.inner.logger.warn(format_args!(
                        "[{}] task is {}; reset() before running again",
                        self.name(),
                        s.as_label()
                    ));
                    return;
                }
                _ => {}
            }

            if !self.dependencies_met() {
                self.inner.logger.info(format_args!(
                    "[{}] task has unmet dependencies, waiting",
                    self.name()
                ));
                let weak = Arc::downgrade(&self.inner);
                self.on_dependencies_met(Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        let task = Task { inner };
                        task.inner.logger.info(format_args!(
                            "[{}] all dependencies met, starting task",
                            task.name()
                        ));
                        tokio::spawn(async move { task.run().await });
                    }
                }));
                return;
            }

            if !self.try_start() {
                // Lost a start race; the winner's body is already on its way.
                return;
            }

            if self.inner.sync_exec {
                self.clone().execute_body().await;
            } else {
                let task = self.clone();
                tokio::spawn(async move { task.execute_body().await });
            }
        })
    }

    /// Pauses a Running task at the next iteration boundary.
    ///
    /// The in-flight attempt is never preempted; pausing is observable via
    /// the state observers and gates the loop before the next iteration.
    pub fn pause(&self) -> bool {
        if self.state() != TaskState::Running {
            return false;
        }
        // send_replace: the gate value must stick even while no waiter is
        // subscribed (the body only subscribes between iterations).
        self.inner.paused.send_replace(true);
        self.set_state(TaskState::Paused);
        true
    }

    /// Resumes a Paused task.
    pub fn resume(&self) -> bool {
        if self.state() != TaskState::Paused {
            return false;
        }
        self.set_state(TaskState::Running);
        self.inner.paused.send_replace(false);
        true
    }

    /// Cancels the task from any non-terminal state. Idempotent against
    /// terminal states.
    pub fn stop(&self) {
        let token = {
            let cell = self.inner.state.lock().unwrap();
            if cell.state.is_terminal() {
                return;
            }
            cell.token.clone()
        };
        self.inner
            .logger
            .info(format_args!("[{}] stopping task", self.name()));
        self.inner.paused.send_replace(false);
        self.set_state(TaskState::Cancelled);
        token.cancel();
    }

    /// Re-opens Idle from any state: stops a running body, replaces the
    /// cancellation token and clears last-error, last-run-time and run count.
    pub fn reset(&self) {
        if self.state() == TaskState::Running || self.state() == TaskState::Paused {
            self.stop();
        }
        {
            let mut cell = self.inner.state.lock().unwrap();
            cell.last_error = None;
            cell.last_run_time = None;
            cell.token = CancellationToken::new();
        }
        self.inner.run_count.store(0, Ordering::SeqCst);
        self.set_state(TaskState::Idle);
        self.inner
            .logger
            .info(format_args!("[{}] task has been reset", self.name()));
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.inner.state.lock().unwrap().token.clone()
    }

    fn cancel_token(&self) {
        self.token().cancel();
    }

    fn record_error(&self, err: Arc<TaskError>) {
        self.inner.state.lock().unwrap().last_error = Some(err);
    }

    fn set_last_run_time(&self, at: SystemTime) {
        self.inner.state.lock().unwrap().last_run_time = Some(at);
    }

    // ---- run body ----

    async fn execute_body(self) {
        let body = {
            let task = self.clone();
            async move { task.execute_core().await }
        };
        if let Err(payload) = AssertUnwindSafe(body).catch_unwind().await {
            let reason = panic_reason(payload);
            self.inner.logger.error(format_args!(
                "[{}] recovered from panic: {}",
                self.name(),
                reason
            ));
            if let Some(hook) = &self.inner.recover_hook {
                hook(&reason);
            }
            self.record_error(Arc::new(TaskError::Panic {
                reason: reason.clone(),
            }));
            self.set_state(TaskState::Failed);
            self.cleanup_context();
        }
    }

    async fn execute_core(&self) {
        let ctx = self.context();
        if let Some(prep) = &self.inner.context_prep {
            if let Err(e) = prep(&ctx) {
                self.inner.logger.error(format_args!(
                    "[{}] context preparation failed: {}",
                    self.name(),
                    e
                ));
                let e = Arc::new(e);
                self.record_error(Arc::clone(&e));
                self.invoke_error_handler(&e);
                self.set_state(TaskState::Failed);
                self.cleanup_context();
                self.cancel_token();
                return;
            }
        }

        let token = self.token();

        if self.inner.startup_delay > Duration::ZERO {
            self.inner.logger.info(format_args!(
                "[{}] startup delay: {:?}",
                self.name(),
                self.inner.startup_delay
            ));
            let sleep = time::sleep(self.inner.startup_delay);
            tokio::pin!(sleep);
            tokio::select! {
                _ = token.cancelled() => {
                    self.inner.logger.warn(format_args!(
                        "[{}] startup delay interrupted",
                        self.name()
                    ));
                    self.finish_cancelled();
                    return;
                }
                _ = &mut sleep => {}
            }
        }

        loop {
            if !self.wait_while_paused(&token).await {
                self.finish_cancelled();
                return;
            }
            // Re-check after the gate: stop() releases it and cancels.
            if token.is_cancelled() {
                self.finish_cancelled();
                return;
            }
            if !self.execute_iteration(&token).await {
                return;
            }
        }
    }

    /// Blocks while Paused; returns `false` on cancellation.
    async fn wait_while_paused(&self, token: &CancellationToken) -> bool {
        let mut rx = self.inner.paused.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    /// One iteration: hooks around one attempt cycle, then the repeat
    /// decision. Returns `false` when the loop must exit.
    async fn execute_iteration(&self, token: &CancellationToken) -> bool {
        if let Some(hook) = self.pre_hook() {
            hook();
        }
        self.set_last_run_time(SystemTime::now());

        match self.run_attempt_cycle(token).await {
            Err(TaskError::Canceled) => {
                self.finish_cancelled();
                return false;
            }
            Err(e) => {
                self.inner.logger.error(format_args!(
                    "[{}] failed after retries: {}",
                    self.name(),
                    e
                ));
                let e = Arc::new(e);
                self.record_error(Arc::clone(&e));
                self.invoke_error_handler(&e);
                if self.inner.cancel_on_failure {
                    self.set_state(TaskState::Failed);
                    self.cleanup_context();
                    self.cancel_token();
                    return false;
                }
            }
            Ok(()) => {}
        }

        if let Some(hook) = self.post_hook() {
            hook();
        }

        let count = self.inner.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.max_runs > 0 && count >= self.inner.max_runs {
            self.inner.logger.info(format_args!(
                "[{}] reached max runs ({}), stopping",
                self.name(),
                self.inner.max_runs
            ));
            self.set_state(TaskState::Completed);
            self.cleanup_context();
            self.cancel_token();
            return false;
        }

        if self.inner.interval == Duration::ZERO {
            self.set_state(TaskState::Completed);
            self.cleanup_context();
            return false;
        }

        let sleep = time::sleep(self.inner.interval);
        tokio::pin!(sleep);
        tokio::select! {
            _ = token.cancelled() => {
                self.inner.logger.info(format_args!(
                    "[{}] next execution canceled",
                    self.name()
                ));
                self.finish_cancelled();
                false
            }
            _ = &mut sleep => true
        }
    }

    /// Runs the job up to `max_retries + 1` times with per-attempt deadline
    /// and metric emission; consults the retry policy between attempts.
    async fn run_attempt_cycle(&self, token: &CancellationToken) -> Result<(), TaskError> {
        let max_retries = self.max_retries();
        let mut attempt: u32 = 0;

        loop {
            let attempt_token = token.child_token();
            let job_ctx = JobContext::new(attempt_token.clone(), self.clone());
            let started = Instant::now();

            let res = if self.inner.timeout > Duration::ZERO {
                match time::timeout(self.inner.timeout, self.inner.job.run(job_ctx)).await {
                    Ok(r) => r,
                    Err(_elapsed) => {
                        attempt_token.cancel();
                        self.inner.logger.error(format_args!(
                            "[{}] task timed out after {:?}",
                            self.name(),
                            self.inner.timeout
                        ));
                        Err(TaskError::Timeout {
                            timeout: self.inner.timeout,
                        })
                    }
                }
            } else {
                self.inner.job.run(job_ctx).await
            };
            let duration = started.elapsed();

            self.collect_metrics(&res, duration);

            match res {
                // A completed attempt counts even if the token fired
                // meanwhile; the loop observes cancellation afterwards.
                Ok(()) => return Ok(()),
                Err(TaskError::Canceled) => return Err(TaskError::Canceled),
                Err(e) => {
                    if token.is_cancelled() {
                        return Err(TaskError::Canceled);
                    }
                    if !self.next_retry(&e, attempt, max_retries, token).await? {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn max_retries(&self) -> u32 {
        match &self.inner.retry_policy {
            Some(policy) => policy.max_retries(),
            None => self.inner.retry_times,
        }
    }

    /// Decides whether to go around again, sleeping the policy delay.
    ///
    /// `Err(Canceled)` aborts the iteration when the token fires mid-delay,
    /// without invoking the job again.
    async fn next_retry(
        &self,
        err: &TaskError,
        attempt: u32,
        max_retries: u32,
        token: &CancellationToken,
    ) -> Result<bool, TaskError> {
        if attempt >= max_retries {
            return Ok(false);
        }

        let Some(policy) = &self.inner.retry_policy else {
            self.inner.logger.warn(format_args!(
                "[{}] attempt {} failed: {}, retrying",
                self.name(),
                attempt + 1,
                err
            ));
            return Ok(true);
        };

        if !policy.should_retry(err) {
            self.inner.logger.warn(format_args!(
                "[{}] error not retryable: {}",
                self.name(),
                err
            ));
            return Ok(false);
        }
        let delay = policy.next_retry_delay(attempt, err);
        if delay == Duration::ZERO {
            self.inner.logger.warn(format_args!(
                "[{}] retry policy decided not to retry",
                self.name()
            ));
            return Ok(false);
        }

        self.inner.logger.warn(format_args!(
            "[{}] attempt {} failed: {}, retrying after {:?}",
            self.name(),
            attempt + 1,
            err,
            delay
        ));
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        tokio::select! {
            _ = token.cancelled() => Err(TaskError::Canceled),
            _ = &mut sleep => Ok(true),
        }
    }

    fn collect_metrics(&self, res: &Result<(), TaskError>, duration: Duration) {
        if let Some(collector) = &self.inner.metric_collector {
            collector(JobResult {
                name: self.name().to_string(),
                duration,
                success: res.is_ok(),
                error: res.as_ref().err().map(|e| e.to_string()),
            });
        }
    }

    fn finish_cancelled(&self) {
        self.inner
            .logger
            .info(format_args!("[{}] task stopped", self.name()));
        self.set_state(TaskState::Cancelled);
        self.cleanup_context();
    }

    fn cleanup_context(&self) {
        if let Some(clean) = &self.inner.context_clean {
            if let Some(ctx) = self.try_context() {
                clean(&ctx);
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
