//! Backoff schedule for buffered events.
//!
//! Two failure kinds are scheduled differently by the outbox:
//!
//! - broker unreachable: retried for as long as the event stays buffered,
//!   backing off up to `max_delay`;
//! - broker refused the message: retried at most `max_attempts` times.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backoff {
    /// `base_delay` every time.
    Fixed,
    /// `base_delay * 2^(attempt - 1)`.
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Send attempts allowed for a message the broker refuses.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single delay, jitter included.
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Random spread applied to each delay, as a fraction (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(500), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// Constant delay, no jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff: Backoff::Exponential,
            jitter: 0.1,
        }
    }

    /// Wait before the next send, after `attempt` failed sends (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let nominal = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        self.spread(nominal.min(self.max_delay))
    }

    /// Whether a refused message may be sent again after `attempts` tries.
    pub fn allows_attempt_after(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    fn spread(&self, nominal: Duration) -> Duration {
        let factor = self.jitter.clamp(0.0, 1.0);
        if factor == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let offset = rand::thread_rng().gen_range(-factor..=factor);
        Duration::try_from_secs_f64(nominal.as_secs_f64() * (1.0 + offset))
            .unwrap_or(nominal)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_jitter(policy: RetryPolicy) -> RetryPolicy {
        RetryPolicy { jitter: 0.0, ..policy }
    }

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let policy = without_jitter(RetryPolicy::exponential(
            10,
            Duration::from_millis(100),
            Duration::from_millis(1000),
        ));
        assert_eq!(policy.delay_after(0), Duration::ZERO);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
        // A long outage keeps counting attempts; the delay stays capped.
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(250));
        assert_eq!(fixed.delay_after(1), Duration::from_millis(250));
        assert_eq!(fixed.delay_after(40), Duration::from_millis(250));
    }

    #[test]
    fn jitter_spreads_delays_within_bounds() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(1000), Duration::from_secs(60));
        let delays: Vec<Duration> = (0..200).map(|_| policy.delay_after(2)).collect();

        for delay in &delays {
            assert!(*delay >= Duration::from_millis(1800), "{delay:?}");
            assert!(*delay <= Duration::from_millis(2200), "{delay:?}");
        }
        let first = delays[0];
        assert!(delays.iter().any(|d| *d != first));
    }

    #[test]
    fn jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy {
            jitter: 1.0,
            ..RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(400))
        };
        for attempt in 1..=20 {
            assert!(policy.delay_after(attempt) <= Duration::from_millis(400));
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        assert!(policy.allows_attempt_after(1));
        assert!(policy.allows_attempt_after(2));
        assert!(!policy.allows_attempt_after(3));
    }
}
