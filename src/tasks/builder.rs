//! # Fluent task construction.
//!
//! [`TaskBuilder`] layers ergonomic setters over [`TaskConfig`]. Every option
//! from the config table has a `with_*` method; job variants exist for plain
//! jobs, context-aware jobs and snapshot-map jobs.
//!
//! ```rust
//! use std::time::Duration;
//! use taskling::{Priority, Task};
//!
//! let task = Task::builder("heartbeat")
//!     .with_job(|_ctx| async { Ok(()) })
//!     .with_repeat(Duration::from_secs(30))
//!     .with_priority(Priority::High)
//!     .build();
//! assert_eq!(task.name(), "heartbeat");
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{CtxValue, JobContext, TaskContext, Validator};
use crate::error::TaskError;
use crate::logging::LoggerRef;
use crate::policies::RetryPolicyRef;
use crate::tasks::config::{
    ContextClean, ContextPrep, ErrorHandler, Hook, MetricCollector, RecoverHook, TaskConfig,
};
use crate::tasks::job::{JobFn, JobRef, JobResult};
use crate::tasks::state::{Priority, TaskState};
use crate::tasks::task::{StateListener, Task};

/// Fluent façade over [`TaskConfig`].
pub struct TaskBuilder {
    config: TaskConfig,
}

impl TaskBuilder {
    /// Starts a builder for a task with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: TaskConfig::new(name),
        }
    }

    /// Builds from an existing config value.
    pub fn from_config(config: TaskConfig) -> Self {
        Self { config }
    }

    /// Sets the job from a closure producing a fresh future per attempt.
    pub fn with_job<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.config.job = Some(JobFn::arc(f));
        self
    }

    /// Sets the job from a pre-built [`JobRef`].
    pub fn with_job_ref(mut self, job: JobRef) -> Self {
        self.config.job = Some(job);
        self
    }

    /// Job variant receiving the task's [`TaskContext`] alongside the
    /// cancellation context.
    pub fn with_context_job<F, Fut>(self, f: F) -> Self
    where
        F: Fn(JobContext, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.with_job(move |ctx: JobContext| {
            let task_ctx = ctx.context();
            f(ctx, task_ctx)
        })
    }

    /// Job variant receiving a flattened snapshot of the task context.
    pub fn with_map_context_job<F, Fut>(self, f: F) -> Self
    where
        F: Fn(JobContext, HashMap<String, CtxValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.with_job(move |ctx: JobContext| {
            let data = ctx.context().get_all();
            f(ctx, data)
        })
    }

    /// Per-attempt deadline; zero disables.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Repeat interval between successful iterations.
    pub fn with_repeat(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Upper bound on iterations; zero means unbounded.
    pub fn with_max_runs(mut self, n: u64) -> Self {
        self.config.max_runs = n;
        self
    }

    /// Simple retry budget; superseded by [`with_retry_policy`](Self::with_retry_policy).
    pub fn with_retry(mut self, times: u32) -> Self {
        self.config.retry_times = times;
        self
    }

    /// Full retry policy; also sets the retry budget from the policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicyRef) -> Self {
        self.config.retry_times = policy.max_retries();
        self.config.retry_policy = Some(policy);
        self
    }

    /// Delay before the first iteration.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.config.startup_delay = delay;
        self
    }

    /// Scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.config.priority = priority;
        self
    }

    /// Drive the task to terminal `Failed` on any unrecovered error.
    pub fn with_cancel_on_failure(mut self, cancel: bool) -> Self {
        self.config.cancel_on_failure = cancel;
        self
    }

    /// Run the body inline: `run()` returns only once the task leaves
    /// `Running`.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.config.sync_exec = sync;
        self
    }

    /// Logging sink.
    pub fn with_logger(mut self, logger: LoggerRef) -> Self {
        self.config.logger = Some(logger);
        self
    }

    /// Hook before each iteration.
    pub fn with_pre_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.pre_hook = Some(Arc::new(hook) as Hook);
        self
    }

    /// Hook after each iteration.
    pub fn with_post_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.post_hook = Some(Arc::new(hook) as Hook);
        self
    }

    /// Receives the final error of a failed iteration.
    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&TaskError) + Send + Sync + 'static,
    ) -> Self {
        self.config.error_handler = Some(Arc::new(handler) as ErrorHandler);
        self
    }

    /// Receives the panic payload when the body panics.
    pub fn with_recover(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.config.recover_hook = Some(Arc::new(hook) as RecoverHook);
        self
    }

    /// Receives one [`JobResult`] per attempt.
    pub fn with_metric_collector(
        mut self,
        collector: impl Fn(JobResult) + Send + Sync + 'static,
    ) -> Self {
        self.config.metric_collector = Some(Arc::new(collector) as MetricCollector);
        self
    }

    /// Context hook before the first iteration; an error fails the task
    /// without invoking the job.
    pub fn with_context_prep(
        mut self,
        prep: impl Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> Self {
        self.config.context_prep = Some(Arc::new(prep) as ContextPrep);
        self
    }

    /// Context hook on terminal states.
    pub fn with_context_clean(
        mut self,
        clean: impl Fn(&TaskContext) + Send + Sync + 'static,
    ) -> Self {
        self.config.context_clean = Some(Arc::new(clean) as ContextClean);
        self
    }

    /// Attaches a complete context.
    pub fn with_context(mut self, ctx: TaskContext) -> Self {
        self.config.context = Some(ctx);
        self
    }

    /// Seeds one context entry, creating the context if needed.
    pub fn with_context_value(
        mut self,
        key: impl Into<String>,
        value: impl std::any::Any + Send + Sync,
    ) -> Self {
        self.context_mut().set(key, value);
        self
    }

    /// Replaces the context with `transform` applied to it.
    pub fn with_context_transform(
        mut self,
        f: impl Fn(&str, &CtxValue) -> (String, CtxValue),
    ) -> Self {
        let transformed = self.context_mut().transform(f);
        self.config.context = Some(transformed);
        self
    }

    /// Replaces the context with the entries matching `prefix`.
    pub fn with_context_filter(mut self, prefix: &str) -> Self {
        let filtered = TaskContext::new();
        for (k, v) in self.context_mut().filter(prefix) {
            filtered.set_value(k, v);
        }
        self.config.context = Some(filtered);
        self
    }

    /// Validates the context before the first iteration; failures fail the
    /// task without invoking the job.
    pub fn with_context_validators(self, validators: HashMap<String, Validator>) -> Self {
        self.chain_context_prep(move |ctx| {
            ctx.validate(&validators)
                .map_err(|e| TaskError::fail(format!("context validation failed: {e}")))
        })
    }

    /// Requires the given context keys before the first iteration.
    pub fn with_required_context_keys(
        self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.chain_context_prep(move |ctx| {
            ctx.required_keys(&keys)
                .map_err(|e| TaskError::fail(format!("required context keys check failed: {e}")))
        })
    }

    /// Predecessor tasks; edges are installed at build time.
    pub fn depends_on(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.config.dependencies.extend(tasks);
        self
    }

    /// Observer receiving `(old, new)` on every state transition.
    pub fn with_state_listener(
        mut self,
        listener: impl Fn(TaskState, TaskState) + Send + Sync + 'static,
    ) -> Self {
        self.config.state_listener = Some(Arc::new(listener) as StateListener);
        self
    }

    /// Builds the task.
    ///
    /// # Panics
    /// When no job was set — a programmer error that must not be silently
    /// swallowed.
    pub fn build(self) -> Task {
        Task::from_config(self.config)
    }

    /// Builds the task and starts it immediately.
    pub async fn spawn(self) -> Task {
        let task = self.build();
        task.run().await;
        task
    }

    fn context_mut(&mut self) -> &TaskContext {
        self.config
            .context
            .get_or_insert_with(TaskContext::new)
    }

    fn chain_context_prep(
        mut self,
        next: impl Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> Self {
        let prev = self.config.context_prep.take();
        self.config.context_prep = Some(Arc::new(move |ctx: &TaskContext| {
            if let Some(prev) = &prev {
                prev(ctx)?;
            }
            next(ctx)
        }) as ContextPrep);
        self
    }
}
