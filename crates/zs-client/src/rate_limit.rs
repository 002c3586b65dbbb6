//! Client-side throttling per method class.
//!
//! The limiter keeps a sliding log of send instants for each method class
//! (GET, writes, DELETE). When a class has used its budget inside the window,
//! callers wait until the oldest entry leaves the window plus an additional
//! delay. Responses reporting a nearly exhausted upstream budget can push a
//! shared cool-down that every class honours.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::request::RequestMethod;

/// Limits for the client-side rate limiter. A limit of 0 disables the class.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per window for GET.
    pub get_limit: usize,
    /// Requests per window for POST, PUT and PATCH.
    pub write_limit: usize,
    /// Requests per window for DELETE.
    pub delete_limit: usize,
    /// Length of the sliding window.
    pub window: Duration,
    /// Extra wait added once a window is full.
    pub additional_delay: Duration,
    /// Base cool-down after a low remaining-budget response.
    pub threshold_base_delay: Duration,
    /// Upper bound of the random jitter added to the cool-down.
    pub threshold_max_jitter: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            get_limit: 100,
            write_limit: 100,
            delete_limit: 100,
            window: Duration::from_secs(60),
            additional_delay: Duration::from_secs(5),
            threshold_base_delay: Duration::from_secs(1),
            threshold_max_jitter: Duration::from_millis(500),
        }
    }
}

impl RateLimitConfig {
    /// No client-side throttling.
    pub fn unlimited() -> Self {
        Self {
            get_limit: 0,
            write_limit: 0,
            delete_limit: 0,
            ..Default::default()
        }
    }

    /// Set the same limit for every class.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.get_limit = limit;
        self.write_limit = limit;
        self.delete_limit = limit;
        self
    }

    /// Set the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the additional delay.
    pub fn with_additional_delay(mut self, delay: Duration) -> Self {
        self.additional_delay = delay;
        self
    }

    fn limit(&self, class: MethodClass) -> usize {
        match class {
            MethodClass::Read => self.get_limit,
            MethodClass::Write => self.write_limit,
            MethodClass::Delete => self.delete_limit,
        }
    }
}

/// Rate limit bucket a request method falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodClass {
    Read,
    Write,
    Delete,
}

impl From<RequestMethod> for MethodClass {
    fn from(method: RequestMethod) -> Self {
        match method {
            RequestMethod::Get => MethodClass::Read,
            RequestMethod::Post | RequestMethod::Put | RequestMethod::Patch => MethodClass::Write,
            RequestMethod::Delete => MethodClass::Delete,
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    read: VecDeque<Instant>,
    write: VecDeque<Instant>,
    delete: VecDeque<Instant>,
    deferred_until: Option<Instant>,
}

impl LimiterState {
    fn log(&mut self, class: MethodClass) -> &mut VecDeque<Instant> {
        match class {
            MethodClass::Read => &mut self.read,
            MethodClass::Write => &mut self.write,
            MethodClass::Delete => &mut self.delete,
        }
    }
}

/// Sliding-window limiter shared by all requests of one client.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// The limiter config.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    // A panic while holding the lock cannot leave the logs inconsistent.
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a send at `now`, or return how long to wait before trying again.
    pub fn try_reserve(&self, method: RequestMethod, now: Instant) -> Option<Duration> {
        let class = MethodClass::from(method);
        let mut state = self.lock();

        if let Some(until) = state.deferred_until {
            if until > now {
                return Some(until - now);
            }
            state.deferred_until = None;
        }

        let limit = self.config.limit(class);
        if limit == 0 {
            return None;
        }

        let window = self.config.window;
        let log = state.log(class);
        while log
            .front()
            .is_some_and(|sent| now.saturating_duration_since(*sent) >= window)
        {
            log.pop_front();
        }

        if log.len() < limit {
            log.push_back(now);
            return None;
        }

        let oldest = log.front().copied().unwrap_or(now);
        let age = now.saturating_duration_since(oldest);
        Some(window.saturating_sub(age) + self.config.additional_delay)
    }

    /// Wait until `method` may be sent, then record it.
    pub async fn acquire(&self, ctx: &Context, method: RequestMethod) -> Result<()> {
        loop {
            ctx.check()?;
            match self.try_reserve(method, Instant::now()) {
                None => return Ok(()),
                Some(wait) => {
                    debug!(
                        method = %method,
                        wait_ms = wait.as_millis() as u64,
                        "Throttling request"
                    );
                    ctx.sleep(wait).await?;
                }
            }
        }
    }

    /// Hold back every class for `delay` from now.
    pub fn defer_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut state = self.lock();
        state.deferred_until = Some(match state.deferred_until {
            Some(existing) => existing.max(until),
            None => until,
        });
    }

    /// Cool down after a low remaining-budget response: base delay plus jitter.
    pub fn defer_with_jitter(&self) -> Duration {
        let max_jitter = self.config.threshold_max_jitter.as_millis() as u64;
        let jitter = if max_jitter == 0 {
            0
        } else {
            rand::rng().random_range(0..=max_jitter)
        };
        let delay = self.config.threshold_base_delay + Duration::from_millis(jitter);
        self.defer_for(delay);
        delay
    }

    /// Requests currently logged for the class of `method`.
    pub fn in_flight(&self, method: RequestMethod) -> usize {
        self.lock().log(MethodClass::from(method)).len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
