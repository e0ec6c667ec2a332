use std::time::Duration;

/// Bounded retry schedule: `base_delay * 2^attempt` plus up to `max_jitter` of noise.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay without jitter after failed attempt number `attempt` (1-based).
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.max_jitter.as_secs_f64() * rand::random::<f64>();
        let jitter = Duration::try_from_secs_f64(scaled).unwrap_or(self.max_jitter);
        self.base_delay_for(attempt).saturating_add(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for attempt in 1..=3 {
            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= policy.base_delay_for(attempt));
                assert!(delay <= policy.base_delay_for(attempt) + policy.max_jitter);
            }
        }
    }

    #[test]
    fn test_expected_delay_increases() {
        let policy = RetryPolicy::default();
        let half_jitter = policy.max_jitter / 2;
        let expected: Vec<Duration> = (1..=5)
            .map(|attempt| policy.base_delay_for(attempt) + half_jitter)
            .collect();
        assert!(expected.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_large_attempt_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_for(64), Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_huge_base_delay_does_not_overflow() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(u64::MAX / 2),
            max_jitter: Duration::from_secs(1),
        };
        assert!(policy.delay_for(1) >= policy.base_delay_for(1));
        for attempt in 2..=3 {
            assert_eq!(policy.delay_for(attempt), Duration::MAX);
        }

        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_jitter: Duration::MAX,
        };
        assert!(policy.delay_for(1) <= Duration::MAX);
    }
}
