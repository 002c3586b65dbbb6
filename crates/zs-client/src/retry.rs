//! Retry policy with exponential backoff, jitter and rate limit headers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;

use crate::error::{is_retryable_status, Error};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Minimum delay between retries.
    pub min_wait: Duration,
    /// Maximum backoff delay between retries.
    pub max_wait: Duration,
    /// Backoff strategy to use.
    pub backoff: BackoffStrategy,
    /// Whether to derive waits from rate limit headers.
    pub respect_rate_limit_headers: bool,
    /// Maximum time to wait from rate limit headers.
    pub max_retry_after: Duration,
    /// Statuses that are always retried, on top of the default policy.
    pub retry_status_codes: Vec<u16>,
    /// Cool down when `RateLimit-Remaining` drops to this value (0 disables).
    pub remaining_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 100,
            min_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
            backoff: BackoffStrategy::Exponential { factor: 2.0 },
            respect_rate_limit_headers: true,
            max_retry_after: Duration::from_secs(60),
            retry_status_codes: vec![429],
            remaining_threshold: 0,
        }
    }
}

impl RetryConfig {
    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the minimum wait.
    pub fn with_min_wait(mut self, wait: Duration) -> Self {
        self.min_wait = wait;
        self
    }

    /// Set the maximum backoff wait.
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cap header-derived waits.
    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    /// Set the statuses that are always retried.
    pub fn with_retry_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.retry_status_codes = codes.into();
        self
    }

    /// Enable the remaining-budget cool-down.
    pub fn with_remaining_threshold(mut self, threshold: u32) -> Self {
        self.remaining_threshold = threshold;
        self
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether `status` is retried under this config.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status) || is_retryable_status(status)
    }
}

/// Backoff strategy for determining retry delays.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant,
    /// Linear increase in delay (delay * attempt).
    Linear,
    /// Exponential increase in delay (delay * factor^attempt).
    Exponential { factor: f64 },
    /// Exponential with random jitter to avoid thundering herd.
    ExponentialWithJitter { factor: f64 },
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay(&self, attempt: u32, min_wait: Duration, max_wait: Duration) -> Duration {
        // Past this the multiplier saturates the cap anyway.
        let exponent = attempt.min(32) as i32;
        let secs = match self {
            BackoffStrategy::Constant => min_wait.as_secs_f64(),
            BackoffStrategy::Linear => min_wait.as_secs_f64() * f64::from(attempt + 1),
            BackoffStrategy::Exponential { factor } => {
                min_wait.as_secs_f64() * factor.powi(exponent)
            }
            BackoffStrategy::ExponentialWithJitter { factor } => {
                let base = min_wait.as_secs_f64() * factor.powi(exponent);
                let jitter = rand::rng().random::<f64>() * base;
                base + jitter
            }
        };

        if !secs.is_finite() || secs >= max_wait.as_secs_f64() {
            return max_wait;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Retry policy that determines when and how to retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt: u32,
}

impl RetryPolicy {
    /// Create a new retry policy from config.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of retries taken so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The underlying config.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns true if another retry is allowed.
    pub fn should_retry(&self) -> bool {
        self.attempt < self.config.max_retries
    }

    /// Get the delay before the next retry, or None if retries are exhausted.
    ///
    /// A header-derived `hint` wins over the backoff schedule (capped by
    /// `max_retry_after`).
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = match hint {
            Some(hint) if self.config.respect_rate_limit_headers => {
                hint.min(self.config.max_retry_after)
            }
            _ => self
                .config
                .backoff
                .delay(self.attempt, self.config.min_wait, self.config.max_wait),
        };

        self.attempt += 1;
        Some(delay)
    }

    /// Reset the retry counter.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// What the transport does with an attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the response to the caller.
    Success,
    /// Sleep and try again, preferring `delay_hint` when present.
    Retry { delay_hint: Option<Duration> },
    /// Refresh the token and re-send once.
    Reauthenticate,
    /// Stop and surface an error.
    Fatal,
}

/// Classify a response status.
pub fn classify_status(
    status: u16,
    headers: &HeaderMap,
    config: &RetryConfig,
    now: DateTime<Utc>,
) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        401 | 403 => Disposition::Reauthenticate,
        status if config.is_retryable_status(status) => {
            let delay_hint = matches!(status, 429 | 503)
                .then(|| rate_limit_delay(status, &RateLimitHeaders::from_headers(headers), now));
            Disposition::Retry { delay_hint }
        }
        _ => Disposition::Fatal,
    }
}

/// Classify a failed send.
pub fn classify_error(err: &Error) -> Disposition {
    if err.is_retryable() {
        Disposition::Retry { delay_hint: None }
    } else {
        Disposition::Fatal
    }
}

/// Rate limit headers as sent by the API gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `RateLimit-Remaining`.
    pub remaining: Option<u64>,
    /// `RateLimit-Reset`: epoch seconds, or seconds from now when small.
    pub reset: Option<i64>,
    /// `X-Ratelimit-Remaining-Second`.
    pub remaining_second: Option<u64>,
    /// `X-Ratelimit-Limit-Second`.
    pub limit_second: Option<u64>,
}

/// Reset values below this are relative seconds, not epoch seconds.
const EPOCH_THRESHOLD: i64 = 1_000_000_000;

impl RateLimitHeaders {
    /// Read the rate limit headers. An unparseable remaining count reads as 1.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        let count = |name: &str| value(name).map(|v| v.parse::<u64>().unwrap_or(1));

        Self {
            remaining: count("ratelimit-remaining"),
            reset: value("ratelimit-reset").and_then(|v| v.parse::<i64>().ok()),
            remaining_second: count("x-ratelimit-remaining-second"),
            limit_second: value("x-ratelimit-limit-second").and_then(|v| v.parse().ok()),
        }
    }

    /// Remaining requests, from whichever header is present.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining.or(self.remaining_second)
    }

    /// Time until the reset instant, if it lies in the future.
    pub fn reset_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset = self.reset?;
        let secs = if reset >= EPOCH_THRESHOLD {
            reset - now.timestamp()
        } else {
            reset
        };
        (secs > 0).then(|| Duration::from_secs(secs.unsigned_abs()))
    }
}

/// Wait derived from a 429/503 response.
///
/// - no budget left and a future `RateLimit-Reset`: wait until the reset
/// - `X-Ratelimit-Remaining-Second: 0`: wait for the next one-second window
/// - otherwise 2 s for 429 and 500 ms for anything else
pub fn rate_limit_delay(status: u16, headers: &RateLimitHeaders, now: DateTime<Utc>) -> Duration {
    if matches!(headers.remaining, None | Some(0)) {
        if let Some(delay) = headers.reset_delay(now) {
            return delay;
        }
    }
    if headers.remaining_second == Some(0) {
        return Duration::from_secs(1);
    }
    if status == 429 {
        Duration::from_secs(2)
    } else {
        Duration::from_millis(500)
    }
}
