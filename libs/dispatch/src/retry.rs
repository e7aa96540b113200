//! Retry scheduling for outbound collaborator calls.

use std::time::Duration;

use rand::Rng;

/// What to do after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,

    /// Upper bound for a single delay, before jitter.
    pub max: Duration,

    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
            max_attempts: 8,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let delay = (base_ms * 2.0_f64.powi(retry.min(30) as i32)).min(self.max.as_millis() as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            let spread = delay * jitter;
            delay + rand::rng().random_range(-spread..=spread)
        } else {
            delay
        };

        Duration::from_millis(delay.max(0.0) as u64)
    }

    /// Decide after `attempts` failed attempts in total.
    pub fn after_failure(&self, attempts: u32) -> RetryDecision {
        if attempts >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.delay(attempts.saturating_sub(1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
            max_attempts: 4,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = exact();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(4), Duration::from_secs(10));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = exact();
        assert_eq!(
            policy.after_failure(1),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.after_failure(3),
            RetryDecision::RetryAfter(Duration::from_secs(4))
        );
        assert_eq!(policy.after_failure(4), RetryDecision::GiveUp);
        assert_eq!(policy.after_failure(9), RetryDecision::GiveUp);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            jitter: 0.25,
            ..exact()
        };
        for _ in 0..50 {
            let d = policy.delay(2);
            assert!(d >= Duration::from_millis(3000));
            assert!(d <= Duration::from_millis(5000));
        }
    }
}
