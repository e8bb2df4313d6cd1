//! # The user-work seam.
//!
//! [`Job`] is the trait a unit of work implements; [`JobFn`] wraps plain
//! closures. A job **creates a new future per invocation** — the trait takes
//! `&self` and must not rely on hidden mutable state between attempts; shared
//! state goes behind an explicit `Arc`.
//!
//! ## Rules
//! - Jobs receive a [`JobContext`] and must observe its cancellation token at
//!   their own suspension points.
//! - Returning `Err(TaskError::Canceled)` after detecting cancellation is the
//!   graceful exit; it is never treated as a failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::context::JobContext;
use crate::error::TaskError;

/// Boxed future returned by one job invocation.
pub type BoxJobFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Shared handle to a job object.
pub type JobRef = Arc<dyn Job>;

/// An invocable unit of work.
///
/// ## Example
/// ```rust
/// use taskling::{BoxJobFuture, Job, JobContext};
///
/// struct Probe;
///
/// impl Job for Probe {
///     fn run(&self, ctx: JobContext) -> BoxJobFuture {
///         Box::pin(async move {
///             if ctx.is_cancelled() {
///                 return Err(taskling::TaskError::Canceled);
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Job: Send + Sync + 'static {
    /// Creates a fresh future running one attempt of the work.
    fn run(&self, ctx: JobContext) -> BoxJobFuture;
}

/// Function-backed job: wraps `Fn(JobContext) -> Future`.
pub struct JobFn<F> {
    f: F,
}

impl<F, Fut> JobFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps the closure and returns it as a shared [`JobRef`].
    pub fn arc(f: F) -> JobRef {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> Job for JobFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn run(&self, ctx: JobContext) -> BoxJobFuture {
        Box::pin((self.f)(ctx))
    }
}

/// Outcome of one attempt, delivered to the metric collector.
#[derive(Clone, Debug)]
pub struct JobResult {
    /// Task name.
    pub name: String,
    /// Wall time of the attempt.
    pub duration: Duration,
    /// Whether the attempt returned `Ok`.
    pub success: bool,
    /// Display form of the error, when unsuccessful.
    pub error: Option<String>,
}
