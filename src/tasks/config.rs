//! # Plain task configuration.
//!
//! [`TaskConfig`] enumerates every recognized option as a field with a
//! documented default. [`TaskBuilder`](crate::TaskBuilder) is the fluent
//! façade most callers use; the config value exists so the full option
//! surface is a single inspectable struct rather than an opaque option list.

use std::sync::Arc;
use std::time::Duration;

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::logging::LoggerRef;
use crate::policies::RetryPolicyRef;
use crate::tasks::job::{JobRef, JobResult};
use crate::tasks::state::Priority;
use crate::tasks::task::{StateListener, Task};

/// Parameterless hook run around each iteration.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Receives the final error of a failed iteration.
pub type ErrorHandler = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// Receives the stringified panic payload.
pub type RecoverHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives one [`JobResult`] per attempt.
pub type MetricCollector = Arc<dyn Fn(JobResult) + Send + Sync>;

/// Prepares the task context before the first iteration; an error fails the
/// task without invoking the job.
pub type ContextPrep = Arc<dyn Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync>;

/// Runs when the task reaches a terminal state, before the context is
/// abandoned.
pub type ContextClean = Arc<dyn Fn(&TaskContext) + Send + Sync>;

/// Every recognized task option, with defaults.
///
/// | Field | Default | Effect |
/// |---|---|---|
/// | `name` | — | Human label; not required unique. |
/// | `job` | `None` | Required at build time. |
/// | `timeout` | `0` | Per-attempt deadline; zero disables. |
/// | `interval` | `0` | Repeat interval; zero means run once. |
/// | `max_runs` | `0` | Iteration bound; zero means unbounded. |
/// | `retry_times` | `0` | Simple retry budget (no policy). |
/// | `retry_policy` | `None` | Overrides `retry_times`. |
/// | `startup_delay` | `0` | Delay before the first iteration. |
/// | `priority` | `Normal` | Queue ordering. |
/// | `cancel_on_failure` | `false` | Terminal `Failed` on unrecovered error. |
/// | `sync_exec` | `false` | `run()` awaits the body inline when `true`. |
/// | `logger` | `None` | Resolved via `default_logger()`. |
#[derive(Default)]
pub struct TaskConfig {
    /// Human label and the display key in pool logs.
    pub name: String,
    /// The work itself. Required.
    pub job: Option<JobRef>,
    /// Per-attempt deadline; `Duration::ZERO` disables it.
    pub timeout: Duration,
    /// Wait between successful iterations; `Duration::ZERO` means one-shot.
    pub interval: Duration,
    /// Upper bound on iterations; `0` means unbounded.
    pub max_runs: u64,
    /// Simple retry budget, used when no policy is set.
    pub retry_times: u32,
    /// Full retry policy; takes precedence over `retry_times`.
    pub retry_policy: Option<RetryPolicyRef>,
    /// Delay before the first iteration.
    pub startup_delay: Duration,
    /// Scheduling priority.
    pub priority: Priority,
    /// Drive the task to terminal `Failed` on any unrecovered error.
    pub cancel_on_failure: bool,
    /// Run the body inline instead of on a scheduler-owned task.
    pub sync_exec: bool,
    /// Logging sink; `None` resolves through the default factory.
    pub logger: Option<LoggerRef>,
    /// Invoked before each iteration.
    pub pre_hook: Option<Hook>,
    /// Invoked after each successful-or-continuing iteration.
    pub post_hook: Option<Hook>,
    /// Receives the final error of a failed iteration.
    pub error_handler: Option<ErrorHandler>,
    /// Receives the panic payload when the body panics.
    pub recover_hook: Option<RecoverHook>,
    /// Receives one record per attempt.
    pub metric_collector: Option<MetricCollector>,
    /// Context lifecycle hook, before the first iteration.
    pub context_prep: Option<ContextPrep>,
    /// Context lifecycle hook, on terminal states.
    pub context_clean: Option<ContextClean>,
    /// Pre-seeded context; created lazily when absent.
    pub context: Option<TaskContext>,
    /// Predecessor tasks; edges are installed at build time.
    pub dependencies: Vec<Task>,
    /// Observer for every state transition.
    pub state_listener: Option<StateListener>,
}

impl TaskConfig {
    /// Config with the given name and all defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
