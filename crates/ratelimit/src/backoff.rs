use notify_guard_types::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Computes the wait between delivery attempts:
/// `base * factor^attempt + uniform(0, jitter_ms) ms`.
///
/// `attempt` is 0-indexed; the delay computed after attempt N fails is slept
/// before attempt N+1. Uncapped unless `with_max_delay` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffCalculator {
    max_delay: Option<Duration>,
}

impl BackoffCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn delay(
        &self,
        attempt: u32,
        base_delay_seconds: f64,
        backoff_factor: f64,
        jitter_ms: u64,
    ) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = base_delay_seconds * backoff_factor.powi(exponent);

        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };

        let exponential = Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        });
        let delay = exponential.saturating_add(Duration::from_millis(jitter));

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    pub fn delay_for(&self, attempt: u32, policy: &RetryPolicy) -> Duration {
        self.delay(
            attempt,
            policy.base_delay_seconds,
            policy.backoff_factor,
            policy.jitter_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression_without_jitter() {
        let backoff = BackoffCalculator::new();

        assert_eq!(backoff.delay(0, 2.0, 2.0, 0), Duration::from_secs(2));
        assert_eq!(backoff.delay(1, 2.0, 2.0, 0), Duration::from_secs(4));
        assert_eq!(backoff.delay(2, 2.0, 2.0, 0), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_custom_factor() {
        let backoff = BackoffCalculator::new();

        assert_eq!(backoff.delay(0, 0.1, 3.0, 0), Duration::from_millis(100));
        assert_eq!(backoff.delay(2, 0.5, 3.0, 0), Duration::from_millis(4500));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let backoff = BackoffCalculator::new();

        for _ in 0..100 {
            let delay = backoff.delay(1, 1.0, 2.0, 250);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2250));
        }
    }

    #[test]
    fn test_backoff_uncapped_by_default() {
        let backoff = BackoffCalculator::new();
        assert!(backoff.max_delay().is_none());
        assert_eq!(backoff.delay(10, 2.0, 2.0, 0), Duration::from_secs(2048));
    }

    #[test]
    fn test_backoff_max_delay_cap() {
        let backoff = BackoffCalculator::new().with_max_delay(Duration::from_secs(30));

        for attempt in 0..20 {
            let delay = backoff.delay(attempt, 2.0, 2.0, 500);
            assert!(delay <= Duration::from_secs(30));
        }
        assert_eq!(backoff.delay(10, 2.0, 2.0, 0), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_huge_exponent_saturates() {
        let backoff = BackoffCalculator::new();
        assert_eq!(backoff.delay(5000, 2.0, 10.0, 0), Duration::MAX);
    }

    #[test]
    fn test_delay_for_policy() {
        let policy = RetryPolicy::new("auth", "sms")
            .with_backoff(1.0, 2.0)
            .with_jitter_ms(0);

        let backoff = BackoffCalculator::new();
        assert_eq!(backoff.delay_for(3, &policy), Duration::from_secs(8));
    }
}
