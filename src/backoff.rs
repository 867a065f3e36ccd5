//! Backoff schedule for retryable failures.

use std::time::Duration;

use rand::Rng;

use crate::RetryOptions;

/// Decision returned by the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop; the retry budget is spent.
    NoRetry,
    /// Try again after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff derived from [`RetryOptions`].
///
/// The delay before retry `n` (1-based) is
/// `min_timeout * factor^(n - 1)`, optionally scaled by a random factor in
/// `[1, 2)`, and capped at `max_timeout`.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_attempts: u32,
    factor: f64,
    min_timeout: Duration,
    max_timeout: Option<Duration>,
    randomize: bool,
    max_retry_time: Option<Duration>,
}

impl From<&RetryOptions> for Backoff {
    fn from(options: &RetryOptions) -> Self {
        Self {
            max_attempts: options.max_attempts(),
            factor: options.factor,
            min_timeout: Duration::from_millis(options.min_timeout_ms),
            max_timeout: options.max_timeout_ms.map(Duration::from_millis),
            randomize: options.randomize,
            max_retry_time: options.max_retry_time_ms.map(Duration::from_millis),
        }
    }
}

impl Backoff {
    /// Maximum number of attempts (including the first).
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether another attempt may follow attempt number `attempt`
    /// (1-based), given the time spent since the first attempt started.
    pub fn decide(&self, attempt: u32, elapsed: Duration) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        if self.max_retry_time.is_some_and(|limit| elapsed >= limit) {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay(attempt))
    }

    /// Delay inserted after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let random = if self.randomize {
            rand::thread_rng().gen_range(1.0..2.0)
        } else {
            1.0
        };
        let base_ms = self.min_timeout.as_millis() as f64;
        let mut millis = (random * base_ms * self.factor.powi(exponent)).round();
        if let Some(max) = self.max_timeout {
            millis = millis.min(max.as_millis() as f64);
        }
        // Float-to-int casts saturate, so overflow lands on u64::MAX.
        Duration::from_millis(millis as u64)
    }
}
