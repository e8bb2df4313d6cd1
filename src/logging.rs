//! # Levelled logging seam.
//!
//! [`Logger`] is the injection point for log output: four levels, each taking
//! pre-formatted [`fmt::Arguments`]. The engine never writes to a sink
//! directly; every component receives a [`LoggerRef`] at construction.
//!
//! Implementations shipped with the crate:
//! - [`TracingLogger`] — forwards to the `tracing` ecosystem (the default,
//!   via [`default_logger`]).
//! - [`FuncLogger`] — adapts a single `fn(level, message)` closure.
//! - [`NopLogger`] — discards everything; handy in tests.
//!
//! ## Rules
//! - Constructors accept `Option<LoggerRef>`; `None` resolves through
//!   [`default_logger`], never through hidden global state.

use std::fmt;
use std::sync::Arc;

/// Shared handle to a logger implementation.
pub type LoggerRef = Arc<dyn Logger>;

/// Log severity, lowest to highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Diagnostic chatter (queue movements, worker wake-ups).
    Debug,
    /// Normal lifecycle messages.
    Info,
    /// Suspicious but non-fatal conditions (double start, dropped submit).
    Warn,
    /// Failures.
    Error,
}

/// Levelled logging sink.
///
/// Messages arrive pre-formatted; implementations only route them.
pub trait Logger: Send + Sync {
    /// Records a debug-level message.
    fn debug(&self, args: fmt::Arguments<'_>);

    /// Records an info-level message.
    fn info(&self, args: fmt::Arguments<'_>);

    /// Records a warn-level message.
    fn warn(&self, args: fmt::Arguments<'_>);

    /// Records an error-level message.
    fn error(&self, args: fmt::Arguments<'_>);
}

/// Returns the crate's default logger: a [`TracingLogger`].
///
/// This is an explicit factory; nothing is constructed at program start and
/// nothing needs tearing down.
pub fn default_logger() -> LoggerRef {
    Arc::new(TracingLogger)
}

/// Logger that emits `tracing` events under the `taskling` target.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "taskling", "{args}");
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "taskling", "{args}");
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "taskling", "{args}");
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "taskling", "{args}");
    }
}

/// Adapter turning a single closure into a [`Logger`].
///
/// Useful when the host program has its own sink and only wants one entry
/// point.
pub struct FuncLogger<F>
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    f: F,
}

impl<F> FuncLogger<F>
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    /// Wraps `f` as a logger.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps `f` and returns it as a shared handle.
    pub fn arc(f: F) -> LoggerRef
    where
        F: 'static,
    {
        Arc::new(Self::new(f))
    }
}

impl<F> Logger for FuncLogger<F>
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn debug(&self, args: fmt::Arguments<'_>) {
        (self.f)(LogLevel::Debug, &args.to_string());
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        (self.f)(LogLevel::Info, &args.to_string());
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        (self.f)(LogLevel::Warn, &args.to_string());
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        (self.f)(LogLevel::Error, &args.to_string());
    }
}

/// Logger that discards every message.
pub struct NopLogger;

impl Logger for NopLogger {
    fn debug(&self, _args: fmt::Arguments<'_>) {}
    fn info(&self, _args: fmt::Arguments<'_>) {}
    fn warn(&self, _args: fmt::Arguments<'_>) {}
    fn error(&self, _args: fmt::Arguments<'_>) {}
}

/// Resolves an optional logger through the default factory.
pub(crate) fn resolve(logger: Option<LoggerRef>) -> LoggerRef {
    logger.unwrap_or_else(default_logger)
}
