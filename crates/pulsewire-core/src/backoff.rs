//! Reconnection delay policy.

use std::time::Duration;

/// Exponential backoff with a ceiling and a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(15000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    ///
    /// Failure `max_attempts` schedules nothing, so the largest delay ever
    /// used is `delay(max_attempts - 1)`. With the default base and ceiling
    /// the 15s cap is only reached when `max_attempts > 5`.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 15000]);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(15000));
    }

    #[test]
    fn attempt_zero_uses_base() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(250),
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(250));
    }

    #[test]
    fn cap_needs_more_than_five_attempts() {
        let scheduled_max = |policy: ReconnectPolicy| {
            (1..=policy.max_attempts)
                .take_while(|n| !policy.is_exhausted(*n))
                .map(|n| policy.delay(n))
                .max()
        };
        let default = ReconnectPolicy::default();
        assert_eq!(scheduled_max(default), Some(Duration::from_millis(8000)));

        let six = ReconnectPolicy {
            max_attempts: 6,
            ..default
        };
        assert_eq!(scheduled_max(six), Some(Duration::from_millis(15000)));
    }

    #[test]
    fn exhausted_at_max_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }
}
