/// Exponential backoff calculator for re-establishing the skill stream.
///
/// Tracks the current delay and attempt count. The delay is multiplied
/// after each failure, capped at `max_delay`, and optionally spread by up
/// to +/-20% of random jitter so many hosts do not reconnect in lockstep.
/// Each connect starts from a fresh `Backoff`.
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReconnectPolicy {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Consecutive failed attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_jitter() -> bool {
    true
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

pub struct Backoff {
    max_delay: Duration,
    multiplier: u32,
    jitter: bool,
    current_delay: Duration,
    /// Number of consecutive attempts.
    pub attempt: u32,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_delay,
            multiplier,
            jitter: false,
            current_delay: initial_delay,
            attempt: 0,
        }
    }

    pub fn from_policy(policy: &ReconnectPolicy) -> Self {
        let mut backoff = Self::new(
            Duration::from_millis(policy.initial_delay_ms),
            Duration::from_millis(policy.max_delay_ms),
            policy.multiplier.max(1),
        );
        backoff.jitter = policy.jitter;
        backoff
    }

    /// Returns the current delay and advances the state.
    /// The delay is multiplied (up to `max_delay`) for the next call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = (self.current_delay * self.multiplier).min(self.max_delay);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.8..=1.2);
            delay.mul_f64(factor).min(self.max_delay)
        } else {
            delay
        }
    }

    /// Returns true if the consecutive attempt count has reached `max`.
    pub fn exceeded_max_attempts(&self, max: u32) -> bool {
        self.attempt >= max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(60), 2);
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        assert_eq!(b.next_delay(), Duration::from_secs(8));
        assert_eq!(b.next_delay(), Duration::from_secs(16));
    }

    #[test]
    fn test_max_delay_cap() {
        let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(10), 2);
        b.next_delay();
        b.next_delay();
        b.next_delay();
        // 8 * 2 = 16, capped at 10
        assert_eq!(b.next_delay(), Duration::from_secs(10));
        assert_eq!(b.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_exceeded_max_attempts() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 2);
        assert!(!b.exceeded_max_attempts(2));
        b.next_delay();
        assert!(!b.exceeded_max_attempts(2));
        b.next_delay();
        assert!(b.exceeded_max_attempts(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = ReconnectPolicy {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2,
            max_attempts: 5,
            jitter: true,
        };
        for _ in 0..50 {
            let mut b = Backoff::from_policy(&policy);
            let first = b.next_delay();
            assert!(first >= Duration::from_millis(800), "{first:?}");
            assert!(first <= Duration::from_millis(1200), "{first:?}");
            let second = b.next_delay();
            assert!(second >= Duration::from_millis(1600), "{second:?}");
            assert!(second <= Duration::from_millis(2400), "{second:?}");
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let policy = ReconnectPolicy {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            multiplier: 2,
            max_attempts: 5,
            jitter: true,
        };
        let mut b = Backoff::from_policy(&policy);
        for _ in 0..20 {
            assert!(b.next_delay() <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_zero_multiplier_is_clamped() {
        let policy = ReconnectPolicy {
            multiplier: 0,
            jitter: false,
            ..ReconnectPolicy::default()
        };
        let mut b = Backoff::from_policy(&policy);
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }
}
