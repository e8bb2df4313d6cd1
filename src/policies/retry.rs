//! # The retry policy trait and composition helpers.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;
use crate::policies::{ExponentialBackoffPolicy, FixedDelayPolicy};

/// Shared handle to a retry policy.
pub type RetryPolicyRef = Arc<dyn RetryPolicy>;

/// User-supplied retryability test; takes precedence over everything else.
pub type RetryPredicate = Arc<dyn Fn(&TaskError) -> bool + Send + Sync>;

/// Pluggable retry policy consulted by the attempt loop.
///
/// The loop asks, in order: [`should_retry`](Self::should_retry) — is this
/// error worth another attempt at all — then
/// [`next_retry_delay`](Self::next_retry_delay) — how long to wait, where
/// `Duration::ZERO` means stop retrying.
pub trait RetryPolicy: Send + Sync {
    /// Delay before retry number `attempt + 1` (`attempt` counts from 0).
    ///
    /// Returning `Duration::ZERO` stops the retry loop.
    fn next_retry_delay(&self, attempt: u32, err: &TaskError) -> Duration;

    /// Whether `err` is worth retrying at all.
    fn should_retry(&self, err: &TaskError) -> bool;

    /// Upper bound on retries; total attempts are `max_retries() + 1`.
    fn max_retries(&self) -> u32;
}

/// Retryability decision shared by the shipped policies.
///
/// Order of precedence: user predicate, then configured retryable labels
/// (matched against [`TaskError::as_label`]), then the error's own
/// [`TaskError::is_retryable`].
#[derive(Clone, Default)]
pub(crate) struct RetryFilter {
    pub(crate) labels: Vec<&'static str>,
    pub(crate) predicate: Option<RetryPredicate>,
}

impl RetryFilter {
    pub(crate) fn allows(&self, err: &TaskError) -> bool {
        if let Some(pred) = &self.predicate {
            return pred(err);
        }
        if !self.labels.is_empty() {
            return self.labels.contains(&err.as_label());
        }
        err.is_retryable()
    }
}

/// Policy wrapper that overrides the retryability decision.
struct PredicatePolicy {
    inner: RetryPolicyRef,
    predicate: RetryPredicate,
}

impl RetryPolicy for PredicatePolicy {
    fn next_retry_delay(&self, attempt: u32, err: &TaskError) -> Duration {
        self.inner.next_retry_delay(attempt, err)
    }

    fn should_retry(&self, err: &TaskError) -> bool {
        (self.predicate)(err)
    }

    fn max_retries(&self) -> u32 {
        self.inner.max_retries()
    }
}

/// Wraps `policy` with an arbitrary retryability predicate.
pub fn with_retry_predicate(policy: RetryPolicyRef, predicate: RetryPredicate) -> RetryPolicyRef {
    Arc::new(PredicatePolicy {
        inner: policy,
        predicate,
    })
}

/// Wraps `policy` so only network-looking errors retry.
///
/// The test is a substring check on the error display ("connection" or
/// "network"); hosts with richer error types should install their own
/// predicate via [`with_retry_predicate`].
pub fn retry_on_network_error(policy: RetryPolicyRef) -> RetryPolicyRef {
    with_retry_predicate(
        policy,
        Arc::new(|err: &TaskError| {
            let msg = err.to_string();
            msg.contains("connection") || msg.contains("network")
        }),
    )
}

/// Preset: never retry.
pub fn no_retry() -> RetryPolicyRef {
    Arc::new(FixedDelayPolicy::new(Duration::ZERO, 0))
}

/// Preset: three retries, one second apart.
pub fn simple_retry() -> RetryPolicyRef {
    Arc::new(FixedDelayPolicy::new(Duration::from_secs(1), 3))
}

/// Preset: five retries with exponential backoff, 1s initial, 1min cap.
pub fn progressive_retry() -> RetryPolicyRef {
    Arc::new(ExponentialBackoffPolicy::new(
        Duration::from_secs(1),
        Duration::from_secs(60),
        2.0,
        5,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_wrapper_filters_by_message() {
        let policy = retry_on_network_error(simple_retry());
        assert!(policy.should_retry(&TaskError::fail("connection refused")));
        assert!(policy.should_retry(&TaskError::fail("network unreachable")));
        assert!(!policy.should_retry(&TaskError::fail("schema mismatch")));
        assert_eq!(policy.max_retries(), 3);
    }

    #[test]
    fn presets() {
        assert_eq!(no_retry().max_retries(), 0);
        assert_eq!(simple_retry().max_retries(), 3);
        assert_eq!(progressive_retry().max_retries(), 5);
    }
}
