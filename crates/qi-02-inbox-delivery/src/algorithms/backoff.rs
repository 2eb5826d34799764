//! # Backoff
//!
//! Adaptive poll interval and stream reconnection delays.
//!
//! Polling: the interval resets to `base` whenever the inbox digest changes
//! and grows by `multiplier` (capped at `max`) on every unchanged tick. The
//! sleep adds uniform jitter of up to `jitter × interval`, then clips to
//! `max` and to the time left before the wait times out.

use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for a deadline, about thirty years out.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Adaptive interval state for one polling wait.
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    base: Duration,
    current: Duration,
    multiplier: f64,
    max: Duration,
    jitter: f64,
}

impl PollBackoff {
    /// Create a backoff starting at `base`.
    pub fn new(base: Duration, multiplier: f64, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            current: base,
            multiplier,
            max,
            jitter,
        }
    }

    /// Pre-jitter interval.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Digest changed: back to the base interval.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Digest unchanged: grow the interval.
    pub fn grow(&mut self) {
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
    }

    /// Sleep length for a uniform `sample` in `[0, 1)`, clipped to `max` and
    /// `remaining`.
    pub fn sleep_for(&self, sample: f64, remaining: Duration) -> Duration {
        let jitter = self.current.mul_f64(self.jitter * sample.clamp(0.0, 1.0));
        (self.current + jitter).min(self.max).min(remaining)
    }
}

/// Delay before reconnect attempt `attempts` (zero-based):
/// `base × multiplier^attempts`.
pub fn reconnect_delay(base: Duration, multiplier: f64, attempts: u32) -> Duration {
    let exp = i32::try_from(attempts).unwrap_or(i32::MAX);
    let factor = multiplier.powi(exp);
    if !factor.is_finite() {
        return Duration::MAX;
    }
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Deadline `timeout` from now, clamped so huge timeouts cannot overflow.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn standard() -> PollBackoff {
        PollBackoff::new(
            Duration::from_millis(2000),
            1.5,
            Duration::from_millis(30_000),
            0.3,
        )
    }

    #[test]
    fn test_three_unchanged_ticks() {
        let mut b = standard();
        for _ in 0..3 {
            b.grow();
        }
        assert_eq!(b.current(), Duration::from_millis(6750));
    }

    #[test]
    fn test_growth_caps_at_max() {
        let mut b = standard();
        for _ in 0..20 {
            b.grow();
        }
        assert_eq!(b.current(), Duration::from_millis(30_000));
        assert_eq!(
            b.sleep_for(0.99, Duration::from_secs(600)),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn test_reset_on_change() {
        let mut b = standard();
        b.grow();
        b.grow();
        b.reset();
        assert_eq!(b.current(), Duration::from_millis(2000));
    }

    #[test]
    fn test_sleep_clipped_to_remaining() {
        let b = standard();
        assert_eq!(
            b.sleep_for(0.5, Duration::from_millis(700)),
            Duration::from_millis(700)
        );
    }

    #[test]
    fn test_reconnect_delays() {
        let base = Duration::from_millis(5000);
        assert_eq!(reconnect_delay(base, 2.0, 0), Duration::from_millis(5000));
        assert_eq!(reconnect_delay(base, 2.0, 3), Duration::from_millis(40_000));
        assert_eq!(reconnect_delay(base, 2.0, 5000), Duration::MAX);
    }

    #[tokio::test]
    async fn test_deadline_after_max_duration() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(86_400 * 365));
    }

    #[tokio::test]
    async fn test_deadline_after_regular_timeout() {
        let before = Instant::now();
        let deadline = deadline_after(Duration::from_secs(5));
        assert!(deadline >= before + Duration::from_secs(5));
        assert!(deadline <= Instant::now() + Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn prop_sleep_within_jitter_window(sample in 0.0f64..1.0, ticks in 0usize..3) {
            let mut b = standard();
            for _ in 0..=ticks {
                b.grow();
            }
            let interval = b.current();
            let sleep = b.sleep_for(sample, Duration::from_secs(3600));
            prop_assert!(sleep >= interval);
            prop_assert!(sleep <= interval.mul_f64(1.3) + Duration::from_micros(1));
        }
    }
}
