//! Bounded exponential backoff for conflict and transient-error retries.
//!
//! The saga orchestrator and the coupon workers both retry with the same
//! shape: a small fixed attempt cap and a doubling delay. The policy is a
//! plain value so call sites drive their own loops around mutable state.

use std::time::Duration;

/// Retry policy: attempt cap plus exponential delay schedule.
///
/// The saga default is 3 retries at 50, 100, 200 ms.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for the exponential schedule.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy with the given attempt cap and the default delay schedule.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.initial_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Whether the budget allows retry number `attempt` (0-based).
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_fifty_ms() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(300));
    }

    #[test]
    fn budget_is_exclusive_of_first_try() {
        let policy = RetryPolicy::with_max_retries(3);
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }
}
