//! Reconnection backoff.
//!
//! The delay before reconnection attempt `n` (1-based) is
//!
//! ```text
//! step(n)  = min(base * 2^(n-1), max)
//! delay(n) = min(step(n) + jitter, max),   jitter in [0, ratio * step(n)]
//! ```
//!
//! The jitter ratio is clamped to `[0, 1]`. With that bound the jittered
//! delay of attempt `n` never exceeds the un-jittered step of attempt `n+1`,
//! so consecutive delays are non-decreasing and never exceed `max`.
//!
//! [`Backoff`] carries the attempt counter; the engine resets it on every
//! successful open.

use std::time::Duration;

/// Default delay before the first reconnection attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default upper bound for any delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default jitter ratio.
pub const DEFAULT_JITTER_RATIO: f64 = 0.25;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for the first attempt.
    pub base_delay: Duration,
    /// Cap for every attempt.
    pub max_delay: Duration,
    /// Fraction of the step added as random jitter (0.0..=1.0).
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl BackoffPolicy {
    /// Policy without jitter, mostly for tests.
    pub fn fixed(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio: 0.0,
        }
    }

    /// Un-jittered delay for attempt `attempt` (1-based).
    pub fn step(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let multiplier = 1u32 << shift;
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay for attempt `attempt` with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let step = self.step(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 {
            return step;
        }
        let spread = step.as_secs_f64() * ratio * rand::random::<f64>();
        (step + Duration::from_secs_f64(spread)).min(self.max_delay)
    }
}

/// Attempt counter driven by the engine's supervisor.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Count one more failed attempt and return the delay before the next.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.policy.delay(self.attempts)
    }

    /// Start over from the base delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_doubles_and_caps() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.step(1), Duration::from_millis(100));
        assert_eq!(policy.step(2), Duration::from_millis(200));
        assert_eq!(policy.step(3), Duration::from_millis(400));
        assert_eq!(policy.step(4), Duration::from_millis(500));
        assert_eq!(policy.step(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.step(0), Duration::from_millis(100));
    }

    #[test]
    fn test_jittered_delays_non_decreasing_and_bounded() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(3),
            jitter_ratio: 1.0,
        };
        for _ in 0..200 {
            let mut previous = Duration::ZERO;
            for attempt in 1..=20 {
                let delay = policy.delay(attempt);
                assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
                assert!(delay <= policy.max_delay);
                assert!(delay >= policy.step(attempt));
                previous = delay;
            }
        }
    }

    #[test]
    fn test_jitter_ratio_is_clamped() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 7.5,
        };
        for _ in 0..100 {
            assert!(policy.delay(1) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_reset_starts_from_base() {
        let mut backoff = Backoff::new(BackoffPolicy::fixed(
            Duration::from_millis(10),
            Duration::from_secs(1),
        ));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.attempts(), 3);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }
}
