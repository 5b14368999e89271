//! Exponential backoff for failed publishes.

use std::time::Duration;

/// How often and how far apart the relay retries a failing envelope.
///
/// # Default Values
///
/// - `max_retries`: 5
/// - `base_delay`: 500ms
/// - `max_delay`: 60 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which an envelope is marked failed.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap for the exponential delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt of an envelope that has failed
    /// `retry_count` times before the current failure.
    ///
    /// `base_delay * 2^retry_count`, capped at `max_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Returns true once `attempts` failed attempts exhaust the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..RetryPolicy::default()
        };
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }
}
