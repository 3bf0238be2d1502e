use std::time::Duration;

/// Exponential retry delay, capped at `max`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Backoff {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Delay before the retry numbered `retry_count` (starting at 1).
    ///
    /// `min * 2^(retry_count - 1)`, saturating, never above `max`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry_count.saturating_sub(1))
            .unwrap_or(u32::MAX);

        self.min
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            crate::options::DEFAULT_MIN_RETRY_DELAY,
            crate::options::DEFAULT_MAX_RETRY_DELAY,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Backoff;

    #[test]
    fn doubles_from_min() {
        let backoff = Backoff::default();
        let delays: Vec<u128> = (1..=8).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![50, 100, 200, 400, 800, 1600, 3200, 5000]);
    }

    #[test]
    fn zero_is_treated_as_first_retry() {
        assert_eq!(Backoff::default().delay(0), Duration::from_millis(50));
    }

    #[test]
    fn never_exceeds_max_and_never_decreases() {
        let backoff = Backoff::new(Duration::from_millis(7), Duration::from_millis(1234));
        let mut previous = Duration::ZERO;

        for n in [0, 1, 2, 5, 10, 31, 32, 33, 64, 1000, u32::MAX] {
            let delay = backoff.delay(n);
            assert!(delay <= backoff.max);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn max_below_min_wins() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
    }
}
