//! # Fixed-delay retry policy.

use std::time::Duration;

use crate::error::TaskError;
use crate::policies::{RetryFilter, RetryPolicy, RetryPredicate};

/// Constant delay between attempts, fixed retry budget.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use taskling::{FixedDelayPolicy, RetryPolicy, TaskError};
///
/// let policy = FixedDelayPolicy::new(Duration::from_millis(10), 3);
/// let err = TaskError::fail("boom");
/// assert!(policy.should_retry(&err));
/// assert_eq!(policy.next_retry_delay(0, &err), Duration::from_millis(10));
/// assert_eq!(policy.next_retry_delay(3, &err), Duration::ZERO);
/// ```
pub struct FixedDelayPolicy {
    delay: Duration,
    max_retries: u32,
    filter: RetryFilter,
}

impl FixedDelayPolicy {
    /// Creates a policy retrying up to `max_retries` times, `delay` apart.
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self {
            delay,
            max_retries,
            filter: RetryFilter::default(),
        }
    }

    /// Restricts retrying to errors whose [`TaskError::as_label`] is listed.
    pub fn with_retryable_labels(mut self, labels: impl IntoIterator<Item = &'static str>) -> Self {
        self.filter.labels = labels.into_iter().collect();
        self
    }

    /// Installs a custom retryability test; overrides the label list.
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.filter.predicate = Some(predicate);
        self
    }
}

impl RetryPolicy for FixedDelayPolicy {
    fn next_retry_delay(&self, attempt: u32, _err: &TaskError) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }
        self.delay
    }

    fn should_retry(&self, err: &TaskError) -> bool {
        self.filter.allows(err)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn delay_is_constant_until_budget_exhausted() {
        let p = FixedDelayPolicy::new(Duration::from_millis(20), 2);
        let err = TaskError::fail("x");
        assert_eq!(p.next_retry_delay(0, &err), Duration::from_millis(20));
        assert_eq!(p.next_retry_delay(1, &err), Duration::from_millis(20));
        assert_eq!(p.next_retry_delay(2, &err), Duration::ZERO);
    }

    #[test]
    fn label_list_narrows_retryability() {
        let p = FixedDelayPolicy::new(Duration::from_millis(1), 3)
            .with_retryable_labels(["task_timeout"]);
        assert!(p.should_retry(&TaskError::Timeout {
            timeout: Duration::from_secs(1)
        }));
        assert!(!p.should_retry(&TaskError::fail("other")));
    }

    #[test]
    fn predicate_takes_precedence_over_labels() {
        let p = FixedDelayPolicy::new(Duration::from_millis(1), 3)
            .with_retryable_labels(["task_timeout"])
            .with_predicate(Arc::new(|e| e.to_string().contains("yes")));
        assert!(p.should_retry(&TaskError::fail("yes, again")));
        assert!(!p.should_retry(&TaskError::Timeout {
            timeout: Duration::from_secs(1)
        }));
    }

    #[test]
    fn default_retries_any_retryable_error() {
        let p = FixedDelayPolicy::new(Duration::from_millis(1), 3);
        assert!(p.should_retry(&TaskError::fail("anything")));
        assert!(!p.should_retry(&TaskError::Canceled));
    }
}
