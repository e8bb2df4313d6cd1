//! # Retry policies.
//!
//! A [`RetryPolicy`] is the triple governing the attempt loop: decide whether
//! an error is retryable, compute the delay before the next attempt, and
//! bound the number of retries.
//!
//! - [`FixedDelayPolicy`] — constant delay, fixed retry budget.
//! - [`ExponentialBackoffPolicy`] — growing delay with optional jitter.
//! - [`retry_on_network_error`] — wraps any policy so only network-looking
//!   errors retry.
//! - Presets: [`no_retry`], [`simple_retry`], [`progressive_retry`].

mod backoff;
mod fixed;
mod retry;

pub use backoff::ExponentialBackoffPolicy;
pub use fixed::FixedDelayPolicy;
pub use retry::{
    no_retry, progressive_retry, retry_on_network_error, simple_retry, with_retry_predicate,
    RetryPolicy, RetryPolicyRef, RetryPredicate,
};

pub(crate) use retry::RetryFilter;
