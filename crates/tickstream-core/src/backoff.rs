// Exponential backoff for reconnect attempts.
//
// `delay = min(cap, base * 2^attempt)`, attempts bounded by
// `max_retries`. No jitter: the delay sequence is part of the
// component's observable contract and a single client has no
// thundering-herd problem.

use std::time::Duration;

/// Reconnect pacing for one transport in the preference chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt. Default: 1s.
    pub base: Duration,

    /// Upper bound on any delay. Default: 12s.
    pub cap: Duration,

    /// Attempts allowed per transport before advancing to the next
    /// one in the preference list. Default: 5.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(12),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(12000),
            max_retries: 8,
        };

        let delays: Vec<u64> = (0..7)
            .map(|attempt| policy.delay(attempt).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 12000, 12000, 12000]);
    }

    #[test]
    fn delays_are_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..32 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous, "attempt {attempt}");
            assert!(delay <= policy.cap);
            previous = delay;
        }
    }

    #[test]
    fn large_attempt_does_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(u32::MAX), policy.cap);
    }
}
