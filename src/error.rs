//! # Error types used by the scheduling engine.
//!
//! Three error enums cover the distinct failure surfaces:
//!
//! - [`TaskError`] — errors produced by task execution (user jobs, timeouts,
//!   cancellation, panics, rejected dependency edges).
//! - [`GroupError`] — errors produced by aggregate group operations.
//! - [`ContextError`] — validation failures on a [`TaskContext`](crate::TaskContext).
//!
//! [`TaskError`] provides `as_label` for logs/metrics and `is_retryable()`,
//! the retry loop's default retryability test.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by task execution.
///
/// A user job returns `Result<(), TaskError>`; the engine synthesizes the
/// `Timeout`, `Canceled` and `Panic` variants itself.
///
/// `Canceled` is **not an error** in the traditional sense: it signals
/// intentional termination, drives the task to `Cancelled` (never `Failed`),
/// and is never handed to the error handler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Job execution failed but may succeed if retried.
    #[error("execution failed: {reason}")]
    Fail {
        /// Human-readable failure description.
        reason: String,
    },

    /// One attempt exceeded the configured per-attempt deadline.
    #[error("task timed out after {timeout:?}")]
    Timeout {
        /// The configured timeout that expired.
        timeout: Duration,
    },

    /// The task's cancellation token fired.
    #[error("task canceled")]
    Canceled,

    /// A panic escaped the user job and was converted by the recovery barrier.
    #[error("panic: {reason}")]
    Panic {
        /// Stringified panic payload.
        reason: String,
    },

    /// A `depends_on` edge was rejected because it would close a cycle.
    #[error("dependency cycle: '{task}' -> '{dependency}'")]
    DependencyCycle {
        /// The task the edge was added to.
        task: String,
        /// The predecessor that already (transitively) depends on `task`.
        dependency: String,
    },
}

impl TaskError {
    /// Convenience constructor for user-job failures.
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Canceled => "task_canceled",
            TaskError::Panic { .. } => "task_panic",
            TaskError::DependencyCycle { .. } => "dependency_cycle",
        }
    }

    /// Indicates whether the retry loop may try the attempt again.
    ///
    /// Cancellation and panics never retry; a configured
    /// [`RetryPolicy`](crate::RetryPolicy) further narrows the answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. } | TaskError::Timeout { .. })
    }
}

/// # Errors produced by aggregate group operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GroupError {
    /// `run_and_wait` exceeded its budget; the group was stopped.
    #[error("group '{group}' timed out after {timeout:?}")]
    Timeout {
        /// Group name.
        group: String,
        /// The exceeded budget.
        timeout: Duration,
    },

    /// At least one task in the group reached `Failed`.
    #[error("task '{task}' failed: {error}")]
    TaskFailed {
        /// Name of the first failed task.
        task: String,
        /// The task's terminal error.
        error: Arc<TaskError>,
    },
}

/// # Context validation failures.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ContextError {
    /// A key demanded by `required_keys` is absent.
    #[error("required key not found: {key}")]
    MissingKey {
        /// The missing key.
        key: String,
    },

    /// A validator rejected the value stored under `key`.
    #[error("invalid value for key '{key}': {reason}")]
    Invalid {
        /// The offending key.
        key: String,
        /// Validator-supplied description.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(TaskError::fail("x").as_label(), "task_failed");
        assert_eq!(
            TaskError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .as_label(),
            "task_timeout"
        );
        assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
    }

    #[test]
    fn retryability() {
        assert!(TaskError::fail("boom").is_retryable());
        assert!(TaskError::Timeout {
            timeout: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(!TaskError::Canceled.is_retryable());
        assert!(!TaskError::Panic { reason: "p".into() }.is_retryable());
    }
}
