use std::{thread::sleep, time::Duration};

use rand::Rng as _;
use tracing::warn;

use crate::Error;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Retry policy for requests that fail in a retryable way.
///
/// Between attempts the calling thread sleeps for a random duration in `[0, min(cap, base * 2^attempt))` ("full
/// jitter"). Only errors for which [`Error::is_retryable`] holds are retried; once `max_retries` additional attempts
/// have failed, the last error is returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    /// Creates a policy making at most `max_retries` additional attempts, using the default backoff.
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries, base: DEFAULT_BACKOFF_BASE, cap: DEFAULT_BACKOFF_CAP }
    }

    /// A policy that never retries.
    pub const fn never() -> Self {
        Self::new(0)
    }

    /// Sets the backoff base and cap.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.base = base;
        self.cap = cap;
        self
    }

    /// Returns the maximum number of retries.
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the upper bound of the sleep before retry number `attempt` (zero-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::rng().random_range(0.0..ceiling.as_secs_f64()))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the retry budget is spent.
    pub(crate) fn run<T, F>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.backoff(attempt);
                    warn!(error = %e, attempt = attempt + 1, ?backoff, "Request failed, retrying.");
                    sleep(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::TransportError;

    fn instant() -> RetryPolicy {
        RetryPolicy::new(2).with_backoff(Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn backoff_ceiling_grows_and_caps() {
        let policy = RetryPolicy::new(5).with_backoff(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.backoff_ceiling(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_ceiling(64), Duration::from_millis(500));

        for attempt in 0..5 {
            assert!(policy.backoff(attempt) < policy.backoff_ceiling(attempt));
        }
    }

    #[test]
    fn retries_retryable_errors_until_exhausted() {
        let calls = Cell::new(0);
        let result: Result<(), Error> = instant().run(|| {
            calls.set(calls.get() + 1);
            Err(Error::Transport(TransportError::Connection("refused".to_owned())))
        });

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn stops_on_success() {
        let calls = Cell::new(0);
        let result = instant().run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(Error::ServerRejection { status: 503, body: String::new() })
            } else {
                Ok(calls.get())
            }
        });

        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn never_retries_fatal_errors() {
        let calls = Cell::new(0);
        let result: Result<(), Error> = instant().run(|| {
            calls.set(calls.get() + 1);
            Err(Error::Credential)
        });

        assert!(matches!(result, Err(Error::Credential)));
        assert_eq!(calls.get(), 1);
    }
}
