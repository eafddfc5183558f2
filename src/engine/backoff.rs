//! Exponential backoff as a pure function of the retry count.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::RetryConfig;

/// `delay(n) = min(base * 2^(n-1), max)`, with `delay(0) = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_max_secs),
        )
    }

    /// Wait before attempt `failures + 1`.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(failures - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Earliest time the next attempt is eligible.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay(failures))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_delay_doubles_then_caps() {
        let backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(2), Duration::from_secs(60));
        assert_eq!(backoff.delay(3), Duration::from_secs(120));
        assert_eq!(backoff.delay(4), Duration::from_secs(240));
        assert_eq!(backoff.delay(5), Duration::from_secs(300));
        assert_eq!(backoff.delay(64), Duration::from_secs(300));
    }

    #[test]
    fn test_next_attempt_at() {
        let backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(300));
        let now = Utc::now();
        assert_eq!((backoff.next_attempt_at(now, 2) - now).num_seconds(), 60);
        assert_eq!(backoff.next_attempt_at(now, 0), now);
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_bounded(
            base in 1u64..3600,
            max in 1u64..86_400,
            n in 0u32..200,
        ) {
            let backoff = Backoff::new(Duration::from_secs(base), Duration::from_secs(max));
            prop_assert!(backoff.delay(n) <= backoff.delay(n + 1));
            prop_assert!(backoff.delay(n) <= backoff.max);
        }
    }
}
