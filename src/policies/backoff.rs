//! # Exponential-backoff retry policy.
//!
//! Delay grows as `initial * factor^attempt`, perturbed by positive jitter in
//! `[0, delay/4)` when enabled, then clamped to `max`. Jitter spreads retries
//! of concurrently failing tasks apart.

use std::time::Duration;

use rand::Rng;

use crate::error::TaskError;
use crate::policies::{RetryFilter, RetryPolicy, RetryPredicate};

/// Exponentially growing delay with optional jitter.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use taskling::{ExponentialBackoffPolicy, RetryPolicy, TaskError};
///
/// let policy = ExponentialBackoffPolicy::new(
///     Duration::from_millis(100),
///     Duration::from_secs(10),
///     2.0,
///     5,
/// )
/// .with_jitter(false);
///
/// let err = TaskError::fail("boom");
/// assert_eq!(policy.next_retry_delay(0, &err), Duration::from_millis(100));
/// assert_eq!(policy.next_retry_delay(1, &err), Duration::from_millis(200));
/// // factor^attempt overruns the cap and is clamped.
/// assert_eq!(policy.next_retry_delay(10, &err), Duration::ZERO); // budget spent
/// ```
pub struct ExponentialBackoffPolicy {
    initial: Duration,
    max_delay: Duration,
    factor: f64,
    max_retries: u32,
    jitter: bool,
    filter: RetryFilter,
}

impl ExponentialBackoffPolicy {
    /// Creates a policy growing from `initial` by `factor` per attempt,
    /// capped at `max_delay`, retrying up to `max_retries` times.
    ///
    /// Jitter is **on** by default.
    pub fn new(initial: Duration, max_delay: Duration, factor: f64, max_retries: u32) -> Self {
        Self {
            initial,
            max_delay,
            factor,
            max_retries,
            jitter: true,
            filter: RetryFilter::default(),
        }
    }

    /// Toggles jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
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

impl RetryPolicy for ExponentialBackoffPolicy {
    fn next_retry_delay(&self, attempt: u32, _err: &TaskError) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }

        let grown = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        let mut delay = if grown.is_finite() {
            Duration::try_from_secs_f64(grown).unwrap_or(self.max_delay)
        } else {
            self.max_delay
        };

        if self.jitter {
            let quarter = (delay / 4).as_millis().min(u128::from(u64::MAX)) as u64;
            if quarter > 0 {
                let extra = rand::rng().random_range(0..quarter);
                delay += Duration::from_millis(extra);
            }
        }

        delay.min(self.max_delay)
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

    fn policy(jitter: bool) -> ExponentialBackoffPolicy {
        ExponentialBackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 2.0, 4)
            .with_jitter(jitter)
    }

    #[test]
    fn grows_by_factor_without_jitter() {
        let p = policy(false);
        let err = TaskError::fail("x");
        assert_eq!(p.next_retry_delay(0, &err), Duration::from_millis(100));
        assert_eq!(p.next_retry_delay(1, &err), Duration::from_millis(200));
        assert_eq!(p.next_retry_delay(2, &err), Duration::from_millis(400));
    }

    #[test]
    fn clamps_to_max_delay() {
        let p = policy(false);
        let err = TaskError::fail("x");
        // 100ms * 2^3 = 800ms, 2^4 would exceed the 1s cap but the budget
        // stops first; push the cap instead.
        let p2 = ExponentialBackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(300),
            2.0,
            4,
        )
        .with_jitter(false);
        assert_eq!(p2.next_retry_delay(3, &err), Duration::from_millis(300));
        assert_eq!(p.next_retry_delay(4, &err), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let p = policy(true);
        let err = TaskError::fail("x");
        for _ in 0..32 {
            let d = p.next_retry_delay(1, &err);
            assert!(d >= Duration::from_millis(200));
            assert!(d < Duration::from_millis(250));
        }
    }

    #[test]
    fn zero_budget_never_delays() {
        let p = ExponentialBackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0,
        );
        assert_eq!(
            p.next_retry_delay(0, &TaskError::fail("x")),
            Duration::ZERO
        );
    }
}
