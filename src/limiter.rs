use crate::error::ApiError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Operation-class key shared by every tool that calls the upstream API.
pub const API_REQUEST_KEY: &str = "api-request";

/// Start throttling proactively once this few calls remain in the window.
pub const PREEMPTIVE_THRESHOLD: i64 = 10;

// Added to reset waits so we do not race the window boundary.
const RESET_SAFETY_BUFFER: Duration = Duration::from_secs(1);

/// Rate-limit numbers parsed from upstream response headers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub limit: i64,
    pub remaining: i64,
    pub window_secs: u64,
}

// Most recent observation for a key. Overwritten whole on every update,
// never merged.
#[derive(Debug, Clone)]
struct RateLimitState {
    limit: i64,
    remaining: i64,
    window_secs: u64,
    reset_at: Instant,
}

/// Tunables for the exponential backoff curve. Delays are milliseconds so
/// the struct round-trips cleanly through tool arguments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Tracks the latest observed rate-limit state per operation class and
/// retries rate-limited operations with exponential backoff.
///
/// Constructed once per process and injected into every caller; tests build
/// fresh instances for isolation.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored state for `key`. `None` (unparseable headers)
    /// is silently ignored.
    pub fn record_observation(&self, key: &str, signal: Option<RateLimitSignal>) {
        let Some(sig) = signal else { return };
        let state = RateLimitState {
            limit: sig.limit,
            remaining: sig.remaining,
            window_secs: sig.window_secs,
            reset_at: Instant::now() + Duration::from_secs(sig.window_secs),
        };
        debug!(
            "rate observation for {}: {}/{} remaining, window {}s",
            key, state.remaining, state.limit, state.window_secs
        );
        self.states
            .lock()
            .expect("rate limiter lock poisoned")
            .insert(key.to_string(), state);
    }

    pub fn clear(&self, key: &str) {
        self.states
            .lock()
            .expect("rate limiter lock poisoned")
            .remove(key);
    }

    /// True iff a state is stored for `key` and `remaining <= threshold`.
    pub fn should_preemptively_wait(&self, key: &str, threshold: i64) -> bool {
        self.states
            .lock()
            .expect("rate limiter lock poisoned")
            .get(key)
            .map(|s| s.remaining <= threshold)
            .unwrap_or(false)
    }

    /// Time until the stored window resets, plus a safety buffer. Zero when
    /// nothing is stored for `key`.
    pub fn delay_until_reset(&self, key: &str) -> Duration {
        self.states
            .lock()
            .expect("rate limiter lock poisoned")
            .get(key)
            .map(|s| s.reset_at.saturating_duration_since(Instant::now()) + RESET_SAFETY_BUFFER)
            .unwrap_or(Duration::ZERO)
    }

    /// Exponential backoff with up to 10% jitter. Attempts start at 1.
    pub fn compute_backoff(&self, attempt: u32, opts: &RetryOptions) -> Duration {
        let exp = attempt.max(1) - 1;
        let base = (opts.initial_delay_ms as f64) * opts.backoff_multiplier.powi(exp as i32);
        let capped = base.min(opts.max_delay_ms as f64);
        let jitter = fastrand::f64() * capped * 0.1;
        Duration::from_millis((capped + jitter) as u64)
    }

    /// Run `f` with up to `opts.max_retries` attempts. Only rate-limit
    /// failures are retried; anything else propagates immediately.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        key: &str,
        opts: &RetryOptions,
        f: F,
    ) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if self.should_preemptively_wait(key, PREEMPTIVE_THRESHOLD) {
                let wait = self.delay_until_reset(key);
                if !wait.is_zero() {
                    debug!("{}: near quota, waiting {:?} for window reset", key, wait);
                    tokio::time::sleep(wait).await;
                }
            }
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limit() && attempt < opts.max_retries => {
                    let (signal, retry_after) = match &err {
                        ApiError::RateLimited {
                            signal,
                            retry_after,
                            ..
                        } => (*signal, *retry_after),
                        _ => (None, None),
                    };
                    self.record_observation(key, signal);
                    let delay = retry_after.unwrap_or_else(|| self.compute_backoff(attempt, opts));
                    warn!(
                        "{}: rate limited (attempt {}/{}), backing off {:?}",
                        key, attempt, opts.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
