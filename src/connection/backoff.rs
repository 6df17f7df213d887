//! Reconnection backoff.

use std::time::Duration;

/// Default first reconnection delay.
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Default cap on the reconnection delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Default number of reconnection attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Exponential backoff with a cap and an attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts made after a link loss before the manager reports `Failed`.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before `attempt` (1-based): `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Every delay the policy will wait, in attempt order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(|attempt| self.delay_for(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
    }

    #[test]
    fn caps_at_max_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn attempt_zero_uses_base() {
        assert_eq!(ReconnectPolicy::default().delay_for(0), BASE_RECONNECT_DELAY);
    }

    #[test]
    fn delays_are_monotonic_until_cap() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(3),
            max_attempts: 10,
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays.len(), 10);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        let first_capped = delays
            .iter()
            .position(|d| *d == policy.max_delay)
            .unwrap_or(delays.len());
        assert!(delays[first_capped..].iter().all(|d| *d == policy.max_delay));
    }
}
