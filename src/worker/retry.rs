//! Retry policy for worker requests
//!
//! A policy is a total time budget plus a backoff strategy mapping the
//! number of failed attempts to the wait before the next one. Policies are
//! immutable and shared by reference; attempt counters live in each call's
//! own retry loop.

use rand::Rng;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Time budget for ordinary worker HTTP calls
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Stand-in deadline for budgets too large to add to a clock reading
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `max_attempts` stops counting here and reports the budget as unbounded
const MAX_COUNTED_ATTEMPTS: u32 = 1_000_000;

/// Maps a failed attempt number (1-based) to the delay before the next attempt
pub trait BackoffStrategy: Send + Sync + Debug {
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// `initial * multiplier^(attempt-1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for ExponentialBackoff {
    /// 1s, 2s, 4s, 8s, 16s, 16s, ...
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(16),
            multiplier: 2,
        }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// `step * attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub step: Duration,
    pub max: Duration,
}

impl BackoffStrategy for LinearBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.step
            .checked_mul(attempt.max(1))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// The same delay after every failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff(pub Duration);

impl BackoffStrategy for ConstantBackoff {
    fn delay_for(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Spreads another strategy's delays by up to `ratio` in either direction
#[derive(Debug, Clone, Copy)]
pub struct Jittered<B> {
    pub inner: B,
    pub ratio: f64,
}

impl<B: BackoffStrategy> Jittered<B> {
    pub fn new(inner: B, ratio: f64) -> Self {
        Self {
            inner,
            ratio: if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 },
        }
    }
}

impl<B: BackoffStrategy> BackoffStrategy for Jittered<B> {
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.inner.delay_for(attempt);
        // Fields are public, so the ratio may not have gone through `new`
        if !(self.ratio > 0.0 && self.ratio <= 1.0) || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.ratio)..=(1.0 + self.ratio));
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
    }
}

impl BackoffStrategy for Box<dyn BackoffStrategy> {
    fn delay_for(&self, attempt: u32) -> Duration {
        (**self).delay_for(attempt)
    }
}

/// Total time budget plus backoff strategy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    timeout: Duration,
    backoff: Arc<dyn BackoffStrategy>,
}

impl Default for RetryPolicy {
    /// One hour, exponential 1s..16s
    fn default() -> Self {
        Self::exponential(DEFAULT_WORKER_TIMEOUT)
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, backoff: impl BackoffStrategy + 'static) -> Self {
        Self {
            timeout,
            backoff: Arc::new(backoff),
        }
    }

    /// Exponential backoff with the default curve
    pub fn exponential(timeout: Duration) -> Self {
        Self::new(timeout, ExponentialBackoff::default())
    }

    /// Same strategy, different budget
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            backoff: Arc::clone(&self.backoff),
        }
    }

    /// Total budget for one logical request
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When a call started at `start` runs out of budget. Budgets past what
    /// the clock can represent end thirty years out.
    pub fn deadline_from(&self, start: Instant) -> Instant {
        start
            .checked_add(self.timeout)
            .or_else(|| start.checked_add(FAR_FUTURE))
            .unwrap_or(start)
    }

    /// Delay after `attempt` failed attempts
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }

    /// Attempts a call makes before timing out when every attempt fails
    /// instantly. `None` if the strategy never waits or the budget allows
    /// more than a million attempts.
    pub fn max_attempts(&self) -> Option<u32> {
        let mut elapsed = Duration::ZERO;
        for attempt in 1..=MAX_COUNTED_ATTEMPTS {
            let delay = self.delay_for(attempt);
            if delay.is_zero() {
                return None;
            }
            match elapsed.checked_add(delay) {
                Some(next) if next <= self.timeout => elapsed = next,
                _ => return Some(attempt),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_curve() {
        let backoff = ExponentialBackoff::default();
        let delays: Vec<u64> = (1..=7).map(|a| backoff.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16, 16]);

        // Overflow saturates at the cap instead of panicking
        assert_eq!(backoff.delay_for(200), Duration::from_secs(16));
    }

    #[test]
    fn test_linear_and_constant() {
        let linear = LinearBackoff {
            step: Duration::from_millis(500),
            max: Duration::from_secs(2),
        };
        assert_eq!(linear.delay_for(1), Duration::from_millis(500));
        assert_eq!(linear.delay_for(3), Duration::from_millis(1500));
        assert_eq!(linear.delay_for(10), Duration::from_secs(2));

        let constant = ConstantBackoff(Duration::from_secs(3));
        assert_eq!(constant.delay_for(1), constant.delay_for(99));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let jittered = Jittered::new(ConstantBackoff(Duration::from_secs(10)), 0.2);
        for attempt in 1..50 {
            let delay = jittered.delay_for(attempt);
            assert!(delay >= Duration::from_secs(8) && delay <= Duration::from_secs(12));
        }

        let clamped = Jittered::new(ConstantBackoff(Duration::from_secs(1)), 7.0);
        assert_eq!(clamped.ratio, 1.0);
    }

    #[test]
    fn test_non_finite_jitter_keeps_base_delay() {
        let base = ConstantBackoff(Duration::from_secs(2));

        for ratio in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let jittered = Jittered::new(base, ratio);
            assert_eq!(jittered.ratio, 0.0);
            assert_eq!(jittered.delay_for(1), Duration::from_secs(2));
        }

        // Built without `new`
        let raw = Jittered { inner: base, ratio: f64::NAN };
        assert_eq!(raw.delay_for(3), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_on_huge_delay_does_not_overflow() {
        let jittered = Jittered::new(ConstantBackoff(Duration::MAX), 1.0);
        for attempt in 1..20 {
            jittered.delay_for(attempt);
        }
    }

    #[test]
    fn test_unbounded_budget() {
        let policy = RetryPolicy::exponential(Duration::MAX);
        let start = Instant::now();

        let deadline = policy.deadline_from(start);
        assert!(deadline > start + Duration::from_secs(60 * 60 * 24 * 365));
        assert_eq!(policy.max_attempts(), None);

        let bounded = RetryPolicy::exponential(Duration::from_secs(10));
        assert_eq!(bounded.deadline_from(start), start + Duration::from_secs(10));
    }

    #[test]
    fn test_max_attempts_follows_curve() {
        // 1 + 2 + 4 = 7s of waiting fits in 10s, the next 8s does not
        assert_eq!(RetryPolicy::exponential(Duration::from_secs(10)).max_attempts(), Some(4));

        let constant = RetryPolicy::new(Duration::from_secs(5), ConstantBackoff(Duration::from_secs(1)));
        assert_eq!(constant.max_attempts(), Some(6));

        let spinning = RetryPolicy::new(Duration::from_secs(5), ConstantBackoff(Duration::ZERO));
        assert_eq!(spinning.max_attempts(), None);
    }

    #[test]
    fn test_default_is_one_hour_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.timeout(), Duration::from_secs(3600));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));

        let shorter = policy.with_timeout(Duration::from_secs(30));
        assert_eq!(shorter.timeout(), Duration::from_secs(30));
        assert_eq!(shorter.delay_for(3), Duration::from_secs(4));
    }
}
