//! Bounded polling shared by every readiness wait.
//!
//! A check is called until it yields a value, fails hard, or the attempt
//! ceiling is reached. Waiting between attempts goes through the injected
//! [`Clock`], so tests run without real sleeps.

use std::time::Duration;

use crate::clock::Clock;
use crate::{Error, Result};

/// Default attempt ceiling for readiness waits (50 x 100ms = 5s)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;

/// Default interval between readiness checks
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same interval every time
    Fixed,
    /// Interval multiplied by `factor` after each attempt, capped at `max_interval`
    Exponential { factor: u32, max_interval: Duration },
}

/// Attempt ceiling and pacing for a bounded wait
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_ATTEMPTS, DEFAULT_INTERVAL)
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval, backoff: Backoff::Fixed }
    }

    pub fn exponential(max_attempts: u32, interval: Duration, factor: u32, max_interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Exponential { factor, max_interval },
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max_interval } => {
                let exp = attempt.saturating_sub(1).min(31);
                let mult = factor.max(1).saturating_pow(exp);
                self.interval.saturating_mul(mult).min(max_interval)
            }
        }
    }
}

/// Call `check` until it returns `Ok(Some(_))`.
///
/// `Ok(None)` means "not yet" and schedules another attempt; `Err` aborts the
/// wait immediately. Running out of attempts yields
/// [`Error::HandshakeTimeout`].
pub fn poll_until<T, F>(policy: &RetryPolicy, clock: &dyn Clock, mut check: F) -> Result<T>
where
    F: FnMut(u32) -> Result<Option<T>>,
{
    let started = clock.now_millis();
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        if let Some(value) = check(attempt)? {
            if attempt > 1 {
                log::debug!("ready after {} attempts", attempt);
            }
            return Ok(value);
        }
        log::trace!("attempt {}/{} not ready", attempt, attempts);
        if attempt < attempts {
            clock.sleep(policy.delay_after(attempt));
        }
    }

    Err(Error::HandshakeTimeout {
        attempts,
        waited_ms: clock.now_millis().saturating_sub(started),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn returns_first_ready_value() {
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::default();
        let got = poll_until(&policy, &clock, |attempt| Ok((attempt == 3).then_some(attempt))).unwrap();
        assert_eq!(got, 3);
        assert_eq!(clock.now_millis(), 200);
    }

    #[test]
    fn gives_up_after_ceiling() {
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let err = poll_until::<(), _>(&policy, &clock, |_| {
            calls += 1;
            Ok(None)
        })
        .unwrap_err();
        assert_eq!(calls, 50);
        match err {
            Error::HandshakeTimeout { attempts, waited_ms } => {
                assert_eq!(attempts, 50);
                assert_eq!(waited_ms, 4_900);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn hard_failure_aborts_immediately() {
        let clock = ManualClock::new(0);
        let mut calls = 0;
        let err = poll_until::<(), _>(&RetryPolicy::default(), &clock, |_| {
            calls += 1;
            Err(Error::PopupUnreachable("closed".into()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::PopupUnreachable(_)));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(100), 2, Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }
}
