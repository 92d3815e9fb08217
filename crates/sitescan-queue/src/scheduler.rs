//! Retry scheduling: decides whether a failed job runs again and when.

use std::time::Duration;

/// Bounded-attempt retry policy with exponential backoff.
///
/// With the defaults a job is delivered at most three times; the second
/// delivery waits 5s and the third 10s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// True once `attempts` deliveries have used up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before the next delivery after `attempts` failed deliveries.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Outcome of handing a failed job back to its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The job will become visible again after `delay`.
    Scheduled { attempt: u32, delay: Duration },
    /// Attempts are used up; the job has been dropped from the queue.
    Exhausted { attempts: u32 },
}
