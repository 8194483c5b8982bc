//! Bounded linear backoff for reconnects

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY, MAX_BACKOFF_MULTIPLIER,
};

/// How long to wait between reconnects and when to stop trying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(with = "crate::config::duration_ms")]
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub max_multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            max_multiplier: MAX_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectPolicy {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("reconnect base delay must be > 0".to_string());
        }
        if self.max_multiplier == 0 {
            return Err("backoff multiplier cap must be >= 1".to_string());
        }
        Ok(())
    }

    /// Delay before reconnect number `attempt` (1-based): `min(attempt, cap) * base`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.clamp(1, self.max_multiplier.max(1)))
    }
}

/// Attempt counter driven by a [`ReconnectPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Counts one more attempt and returns how long to wait before it, or [None] once the
    /// attempt bound is reached. The counter never goes past the bound.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for(self.attempts))
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Swaps the policy but keeps the count
    pub fn set_policy(&mut self, policy: ReconnectPolicy) {
        self.policy = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_until_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (1..=7).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![5000, 10000, 15000, 20000, 25000, 25000, 25000]);
    }

    #[test]
    fn three_attempts_then_nothing() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            max_attempts: 3,
            ..Default::default()
        });
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(15000)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 3);
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5000)));
    }

    #[test]
    fn zero_attempts_never_retries() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        });
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 0);
    }

    #[test]
    fn validation() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        let zero = ReconnectPolicy {
            base_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
