//! Reconnect / retry delays for broker operations.

use std::time::Duration;

/// Exponential backoff for `max_attempts`, then one fixed `cooldown`, then the
/// cycle starts over. Never gives up on its own; callers decide when to stop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Cap for the exponential part.
    pub max_delay: Duration,
    /// Exponential steps per cycle.
    pub max_attempts: u32,
    /// Pause after a full cycle of failures.
    pub cooldown: Duration,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            cooldown: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// A short policy for in-call retries (used when publishing).
    pub fn bounded(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            cooldown: max_delay,
            jitter: 0.0,
        }
    }

    /// Delay before retrying after the `failures`-th consecutive failure (1-indexed).
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let cycle = self.max_attempts.max(1) + 1;
        let position = (failures - 1) % cycle;
        if position + 1 == cycle {
            return self.cooldown;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi(position as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        // Deterministic "jitter" derived from the attempt number
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((failures as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether `attempts` so far stay within one cycle.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_attempts: 4,
            cooldown: Duration::from_secs(60),
            jitter: 0.0,
        }
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = policy();

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn cooldown_follows_a_full_cycle_then_repeats() {
        let policy = policy();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            max_delay: Duration::from_millis(300),
            ..policy()
        };
        assert_eq!(policy.delay_for_attempt(8), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_range() {
        let policy = ReconnectPolicy {
            jitter: 0.1,
            ..policy()
        };
        for attempt in 1..=4 {
            let nominal = 100.0 * 2_f64.powi(attempt as i32 - 1);
            let actual = policy.delay_for_attempt(attempt).as_millis() as f64;
            assert!((actual - nominal).abs() <= nominal * 0.1 + 1.0);
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = ReconnectPolicy::bounded(3, Duration::from_millis(10), Duration::from_millis(40));

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_cap_or_cooldown(
            failures in 1u32..100_000,
            max_attempts in 0u32..50,
            jitter in 0.0f64..1.0,
        ) {
            let policy = ReconnectPolicy { max_attempts, jitter, ..policy() };
            let delay = policy.delay_for_attempt(failures).as_millis() as f64;
            let cap = (10_000.0 * (1.0 + jitter)).max(60_000.0);
            proptest::prop_assert!(delay <= cap);
        }
    }
}
