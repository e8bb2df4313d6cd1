//! # Per-attempt execution context.
//!
//! Every job invocation receives a [`JobContext`]: the attempt's
//! [`CancellationToken`] plus a handle to the owning [`Task`]. The token is
//! derived from the task token, with the per-attempt deadline applied when a
//! timeout is configured.
//!
//! ## Rules
//! - Jobs **must** poll [`is_cancelled`](JobContext::is_cancelled) (or await
//!   [`cancelled`](JobContext::cancelled)) at their own suspension points;
//!   cancellation is cooperative at the job boundary.
//! - The task handle lets a job introspect and mutate its own
//!   [`TaskContext`] without any out-of-band plumbing.

use tokio_util::sync::CancellationToken;

use crate::context::TaskContext;
use crate::tasks::Task;

/// Context handed to a job for the duration of one attempt.
#[derive(Clone)]
pub struct JobContext {
    token: CancellationToken,
    task: Task,
}

impl JobContext {
    pub(crate) fn new(token: CancellationToken, task: Task) -> Self {
        Self { token, task }
    }

    /// The attempt's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fast cancellation probe.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the attempt is cancelled (stop, timeout, or pool
    /// shutdown).
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The task this attempt belongs to.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Shortcut to the owning task's context.
    pub fn context(&self) -> TaskContext {
        self.task.context()
    }
}
