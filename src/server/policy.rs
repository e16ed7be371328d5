//! # Restart policy for the supervised server.
//!
//! [`RestartPolicy`] bounds how often a crashing server is brought back and
//! [`BackoffPolicy`] spaces the attempts out so a server that dies on boot
//! does not spin.
//!
//! The delay for attempt `n` (0-indexed) is `first × factor^n`, clamped to `max`.
//!
//! ```rust
//! use std::time::Duration;
//! use valheim_manager::server::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(3), Duration::from_secs(8));
//! assert_eq!(backoff.next(10), Duration::from_secs(60));
//! ```
use std::time::Duration;

/// Delay growth between restart attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub first: Duration,
    /// Cap on any single delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// 5s doubling up to 5 minutes.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(300),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// No delay at all.
    pub fn immediate() -> Self {
        Self {
            first: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Decides whether a crashed server is restarted and when.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RestartPolicy {
    /// Consecutive crashes tolerated before giving up. `None` never gives up.
    pub max_restarts: Option<u32>,
    pub backoff: BackoffPolicy,
    /// Uptime after which the consecutive-crash counter starts over.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: None,
            backoff: BackoffPolicy::default(),
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Whether a restart is allowed after `consecutive_crashes` crashes in a row.
    pub fn allows(&self, consecutive_crashes: u32) -> bool {
        self.max_restarts
            .is_none_or(|max| consecutive_crashes <= max)
    }

    /// Delay before restarting after `consecutive_crashes` crashes in a row.
    pub fn delay(&self, consecutive_crashes: u32) -> Duration {
        self.backoff.next(consecutive_crashes.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
        };

        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
    }

    #[test]
    fn test_overflow_clamps_to_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 10.0,
        };
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_unbounded_policy_always_allows() {
        let policy = RestartPolicy::default();
        assert!(policy.allows(1));
        assert!(policy.allows(10_000));
    }

    #[test]
    fn test_bounded_policy() {
        let policy = RestartPolicy {
            max_restarts: Some(2),
            ..RestartPolicy::default()
        };
        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));

        let never = RestartPolicy {
            max_restarts: Some(0),
            ..RestartPolicy::default()
        };
        assert!(!never.allows(1));
    }

    #[test]
    fn test_delay_starts_at_first() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(10));
    }
}
