use std::time::Duration;

use super::constants::{RECONNECT_DELAY_BASE, RECONNECT_DELAY_MAX, RECONNECT_JITTER_MAX};

/// Exponential reconnect backoff: `base * 2^(attempt - 1)`, capped, plus jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_max: Duration,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration, jitter_max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_max,
            attempt: 0,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), without randomness.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self.base.saturating_mul(1_u32 << exponent);
        exponential.min(self.max) + jitter.min(self.jitter_max)
    }

    /// Advances to the next attempt and returns its jittered delay.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let jitter = if self.jitter_max.is_zero() {
            Duration::ZERO
        } else {
            self.jitter_max.mul_f64(rand::random::<f64>())
        };
        self.delay_for(self.attempt, jitter)
    }

    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RECONNECT_DELAY_BASE, RECONNECT_DELAY_MAX, RECONNECT_JITTER_MAX)
    }
}

/// Random pause in `[min, max)`, used before retrying an invalidated session.
#[must_use]
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    min + (max - min).mul_f64(rand::random::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, 1_000 ; "first_attempt")]
    #[test_case(2, 2_000 ; "second_attempt")]
    #[test_case(3, 4_000 ; "third_attempt")]
    #[test_case(5, 16_000 ; "fifth_attempt")]
    #[test_case(6, 30_000 ; "capped")]
    #[test_case(400, 30_000 ; "large_attempt_capped")]
    fn test_delay_for_attempt(attempt: u32, expected_ms: u64) {
        let backoff = Backoff::default();
        assert_eq!(
            backoff.delay_for(attempt, Duration::ZERO),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn test_consecutive_failures_double_with_jitter_tolerance() {
        let mut backoff = Backoff::default();
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_delay()).collect();

        for (delay, expected) in delays.iter().zip([1_000, 2_000, 4_000]) {
            let expected = Duration::from_millis(expected);
            assert!(*delay >= expected, "{delay:?} < {expected:?}");
            assert!(*delay < expected + RECONNECT_JITTER_MAX);
        }
        assert_eq!(backoff.attempts(), 3);

        backoff.reset();
        assert!(backoff.next_delay() < Duration::from_millis(1_500));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let backoff = Backoff::default();
        let delay = backoff.delay_for(100, Duration::from_secs(10));
        assert_eq!(delay, RECONNECT_DELAY_MAX + RECONNECT_JITTER_MAX);
    }

    #[test]
    fn test_random_delay_range() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(5);
        for _ in 0..32 {
            let delay = random_delay(min, max);
            assert!(delay >= min && delay < max);
        }
        assert_eq!(random_delay(max, min), max);
    }
}
