//! Retry policy: how many times a failing worker invocation is re-attempted
//! and with what backoff.
//!
//! One policy is active per worker at a time. Workers may override it mid-run,
//! which is recorded in the oplog (`ChangeRetryPolicy`) so the override
//! survives recovery.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for exponential backoff on transient invocation failures.
///
/// `max_attempts` counts retries: a policy with `max_attempts = 3` allows
/// three re-executions after the initial failure; the fourth failure makes
/// the worker permanently `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries before the worker transitions to `Failed`.
    pub max_attempts: u32,

    /// Delay before the first retry, and the lower clamp for every delay.
    pub min_delay: Duration,

    /// Upper clamp for the backoff schedule.
    pub max_delay: Duration,

    /// Multiplier for exponential backoff.
    ///
    /// The delay for retry `n` is
    /// `clamp(min_delay * multiplier^(n-1), min_delay, max_delay)`.
    pub multiplier: f64,

    /// Optional additive jitter, as a fraction of the computed delay.
    ///
    /// `Some(0.1)` perturbs each delay by up to +10%. `None` keeps the
    /// schedule fully deterministic.
    pub max_jitter_factor: Option<f64>,
}

impl RetryPolicy {
    /// No retries: the first failure is permanent.
    pub const NONE: Self = Self {
        max_attempts: 0,
        min_delay: Duration::from_secs(0),
        max_delay: Duration::from_secs(0),
        multiplier: 1.0,
        max_jitter_factor: None,
    };

    /// Default policy: 5 retries, 1s..30s, doubling.
    pub const DEFAULT: Self = Self {
        max_attempts: 5,
        min_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
        max_jitter_factor: None,
    };

    /// Creates a policy with the given number of retries and default delays.
    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::DEFAULT
        }
    }

    /// Sets the jitter fraction, returning the modified policy.
    pub fn with_jitter(mut self, max_jitter_factor: f64) -> Self {
        self.max_jitter_factor = Some(max_jitter_factor);
        self
    }

    /// Delay before retry `attempt` (1-indexed), or `None` when the attempt
    /// budget is exhausted and the failure must become permanent.
    ///
    /// The schedule is `clamp(min_delay * multiplier^(attempt-1), min_delay,
    /// max_delay)`; jitter, when configured, is applied on top by
    /// [`RetryPolicy::jittered_delay_for_attempt`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let exponent = (attempt - 1) as f64;
        let raw = self.min_delay.as_secs_f64() * self.multiplier.powf(exponent);
        let clamped = raw
            .max(self.min_delay.as_secs_f64())
            .min(self.max_delay.as_secs_f64());

        Some(Duration::from_secs_f64(clamped))
    }

    /// Like [`RetryPolicy::delay_for_attempt`] but with jitter applied.
    ///
    /// This is what the execution engine actually sleeps for; the
    /// deterministic variant exists so tests can assert the schedule.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let base = self.delay_for_attempt(attempt)?;
        let delay = match self.max_jitter_factor {
            Some(factor) if factor > 0.0 => {
                let jitter = rand::thread_rng().gen_range(0.0..factor);
                Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
            }
            _ => base,
        };
        Some(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_with_cap() {
        // 3 retries at 1s, 2s, 4s; the 4th failure gets no delay and the
        // worker must transition to Failed.
        let policy = RetryPolicy {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            max_jitter_factor: None,
        };

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }

    #[test]
    fn test_backoff_clamps_to_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 6,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            max_jitter_factor: None,
        };

        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for_attempt(5), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for_attempt(6), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for_attempt(7), None);
    }

    #[test]
    fn test_none_policy_never_retries() {
        assert_eq!(RetryPolicy::NONE.delay_for_attempt(1), None);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_attempts: 1,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            max_jitter_factor: Some(0.5),
        };

        for _ in 0..100 {
            let delay = policy.jittered_delay_for_attempt(1).unwrap();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs_f64(1.5));
        }
    }

    #[test]
    fn test_zero_attempt_has_no_delay() {
        assert_eq!(RetryPolicy::DEFAULT.delay_for_attempt(0), None);
    }
}
