//! Backoff delay strategies
//!
//! Every policy is a pure function of the context's attempt count (the
//! number of failures registered so far). A zero delay means the next
//! attempt starts immediately.

use rand::Rng;
use std::time::Duration;

/// Fraction by which jitter may shrink or stretch a delay
pub const JITTER_FACTOR: f64 = 0.25;

/// Highest exponent applied by [`ExponentialBackoff`]
const MAX_EXPONENT: u32 = 31;

/// Computes the delay before the next attempt
pub trait BackoffPolicy: Send + Sync {
    /// Delay to wait after `attempt_count` registered failures
    fn compute_backoff(&self, attempt_count: u32) -> Duration;
}

impl<B: BackoffPolicy + ?Sized> BackoffPolicy for Box<B> {
    fn compute_backoff(&self, attempt_count: u32) -> Duration {
        (**self).compute_backoff(attempt_count)
    }
}

impl<B: BackoffPolicy + ?Sized> BackoffPolicy for std::sync::Arc<B> {
    fn compute_backoff(&self, attempt_count: u32) -> Duration {
        (**self).compute_backoff(attempt_count)
    }
}

/// Always retry immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl BackoffPolicy for NoBackoff {
    fn compute_backoff(&self, _attempt_count: u32) -> Duration {
        Duration::ZERO
    }
}

/// The same delay before every retry
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn compute_backoff(&self, _attempt_count: u32) -> Duration {
        self.delay
    }
}

/// `initial * multiplier^(n-1)`, optionally jittered, capped at `max_delay`
///
/// # Example
///
/// ```rust
/// use rebound_core::retry::{BackoffPolicy, ExponentialBackoff};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::new(
///     Duration::from_millis(1000),
///     2.0,
///     Duration::from_millis(30000),
/// );
///
/// assert_eq!(backoff.compute_backoff(0), Duration::ZERO);
/// assert_eq!(backoff.compute_backoff(1), Duration::from_millis(1000));
/// assert_eq!(backoff.compute_backoff(3), Duration::from_millis(4000));
/// assert_eq!(backoff.compute_backoff(6), Duration::from_millis(30000));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Create a backoff without jitter
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn raw_delay_nanos(&self, attempt_count: u32) -> f64 {
        let exponent = attempt_count.min(MAX_EXPONENT) - 1;
        self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent as i32)
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn compute_backoff(&self, attempt_count: u32) -> Duration {
        if attempt_count == 0 {
            return Duration::ZERO;
        }

        let mut delay_ns = self.raw_delay_nanos(attempt_count);
        if self.jitter {
            delay_ns *= rand::rng().random_range((1.0 - JITTER_FACTOR)..=(1.0 + JITTER_FACTOR));
        }

        clamp_nanos(delay_ns, self.max_delay)
    }
}

/// `initial * n`, capped at `max_delay`
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    initial_delay: Duration,
    max_delay: Duration,
}

impl LinearBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }
}

impl BackoffPolicy for LinearBackoff {
    fn compute_backoff(&self, attempt_count: u32) -> Duration {
        self.initial_delay
            .saturating_mul(attempt_count)
            .min(self.max_delay)
    }
}

/// Clamp a nanosecond value into `[0, max]`; NaN maps to zero
fn clamp_nanos(delay_ns: f64, max: Duration) -> Duration {
    if delay_ns.is_nan() || delay_ns <= 0.0 {
        return Duration::ZERO;
    }
    if delay_ns >= max.as_nanos() as f64 {
        return max;
    }
    Duration::from_nanos(delay_ns.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(initial: u64, multiplier: f64, max: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(initial),
            multiplier,
            Duration::from_millis(max),
        )
    }

    #[test]
    fn test_no_backoff() {
        for attempt in 0..5 {
            assert_eq!(NoBackoff.compute_backoff(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn test_fixed_backoff_ignores_attempt() {
        let backoff = FixedBackoff::new(Duration::from_millis(500));

        assert_eq!(backoff.compute_backoff(1), Duration::from_millis(500));
        assert_eq!(backoff.compute_backoff(2), Duration::from_millis(500));
        assert_eq!(backoff.compute_backoff(10), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_sequence_and_cap() {
        let backoff = exponential(1000, 2.0, 30000);

        let delays: Vec<u128> = (1..=6)
            .map(|a| backoff.compute_backoff(a).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn test_exponential_zero_attempts_waits_nothing() {
        let backoff = exponential(1000, 2.0, 30000).with_jitter(true);
        assert_eq!(backoff.compute_backoff(0), Duration::ZERO);
    }

    #[test]
    fn test_exponential_exponent_is_bounded() {
        let backoff = exponential(1, 2.0, u64::MAX / 2);

        // 2^30 ms for every attempt count from 31 upwards
        let at_limit = backoff.compute_backoff(31);
        assert_eq!(at_limit, Duration::from_millis(1 << 30));
        assert_eq!(backoff.compute_backoff(u32::MAX), at_limit);
    }

    #[test]
    fn test_exponential_custom_multiplier() {
        let backoff = exponential(100, 3.0, 100000);

        assert_eq!(backoff.compute_backoff(1), Duration::from_millis(100));
        assert_eq!(backoff.compute_backoff(2), Duration::from_millis(300));
        assert_eq!(backoff.compute_backoff(3), Duration::from_millis(900));
        assert_eq!(backoff.compute_backoff(4), Duration::from_millis(2700));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = exponential(1000, 2.0, 30000).with_jitter(true);

        for _ in 0..1000 {
            let delay = backoff.compute_backoff(1).as_millis();
            assert!((750..=1250).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let backoff = exponential(1000, 2.0, 1000).with_jitter(true);

        for _ in 0..200 {
            assert!(backoff.compute_backoff(3) <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = LinearBackoff::new(Duration::from_millis(100), Duration::from_millis(350));

        assert_eq!(backoff.compute_backoff(0), Duration::ZERO);
        assert_eq!(backoff.compute_backoff(1), Duration::from_millis(100));
        assert_eq!(backoff.compute_backoff(3), Duration::from_millis(300));
        assert_eq!(backoff.compute_backoff(10), Duration::from_millis(350));
    }

    #[test]
    fn test_exponential_keeps_sub_millisecond_delays() {
        let backoff = ExponentialBackoff::new(
            Duration::from_micros(500),
            2.0,
            Duration::from_millis(10),
        );

        assert_eq!(backoff.compute_backoff(1), Duration::from_micros(500));
        assert_eq!(backoff.compute_backoff(2), Duration::from_millis(1));
        assert_eq!(backoff.compute_backoff(3), Duration::from_millis(2));
    }

    #[test]
    fn test_clamp_handles_non_finite() {
        let max = Duration::from_millis(5000);
        assert_eq!(clamp_nanos(f64::NAN, max), Duration::ZERO);
        assert_eq!(clamp_nanos(f64::INFINITY, max), max);
        assert_eq!(clamp_nanos(-10.0, max), Duration::ZERO);
        assert_eq!(clamp_nanos(1500.4, max), Duration::from_nanos(1500));
    }
}
