//! Bounded retries with deterministic exponential backoff.
//!
//! Attempt 1 runs immediately; before attempt `n` (n >= 2) the caller waits
//! `min(base_delay * 2^(n-2), max_delay)`. Waiting goes through a [`Sleeper`]
//! so tests can record the schedule instead of sleeping.

use std::time::Duration;

use tracing::{debug, warn};

/// Something that can block the current thread for a duration.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// The error that ended a retried operation, plus how many attempts ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    /// Wait inserted before `attempt` (1-indexed). Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// `op` receives the current attempt number.
    pub fn run<T, E, S, P, F>(
        &self,
        sleeper: &S,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, RetryFailure<E>>
    where
        S: Sleeper + ?Sized,
        P: Fn(&E) -> bool,
        F: FnMut(u32) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if attempt < max_attempts && is_retryable(&error) => {
                    let delay = self.delay_before(attempt + 1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        err = %error,
                        "transient failure, retrying"
                    );
                    sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(error) => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        waits: RefCell<Vec<Duration>>,
    }

    impl Sleeper for Recorder {
        fn sleep(&self, duration: Duration) {
            self.waits.borrow_mut().push(duration);
        }
    }

    #[test]
    fn default_schedule_is_two_then_four_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before(4), Duration::from_secs(8));
        assert_eq!(policy.delay_before(5), Duration::from_secs(10));
        assert_eq!(policy.delay_before(60), Duration::from_secs(10));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let sleeper = Recorder::default();
        let result = RetryPolicy::default().run(
            &sleeper,
            |_: &String| true,
            |attempt| {
                if attempt < 3 {
                    Err(format!("boom {attempt}"))
                } else {
                    Ok(attempt)
                }
            },
        );
        assert_eq!(result, Ok(3));
        assert_eq!(
            *sleeper.waits.borrow(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn exhausts_attempts_and_returns_last_error() {
        let sleeper = Recorder::default();
        let result: Result<(), _> =
            RetryPolicy::default().run(&sleeper, |_: &String| true, |attempt| {
                Err(format!("boom {attempt}"))
            });
        assert_eq!(
            result,
            Err(RetryFailure {
                attempts: 3,
                error: "boom 3".to_string()
            })
        );
        assert_eq!(sleeper.waits.borrow().len(), 2);
    }

    #[test]
    fn non_retryable_error_stops_immediately() {
        let sleeper = Recorder::default();
        let result: Result<(), _> =
            RetryPolicy::default().run(&sleeper, |_: &String| false, |_| Err("denied".to_string()));
        assert_eq!(result.expect_err("fails").attempts, 1);
        assert!(sleeper.waits.borrow().is_empty());
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let sleeper = Recorder::default();
        let result: Result<(), _> = policy.run(&sleeper, |_: &String| true, |_| Err("x".to_string()));
        assert_eq!(result.expect_err("fails").attempts, 1);
    }
}
