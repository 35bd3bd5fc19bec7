use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Status codes worth a second try: throttling and transient
/// marketplace unavailability. Everything else fails fast.
pub const RETRYABLE_STATUS: [u16; 2] = [429, 503];

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Fail,
}

/// Implemented by error types so the executor can split transient
/// failures from fatal ones without knowing the transport.
pub trait Classify {
    fn disposition(&self) -> Disposition;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_u32("REPRICER_MAX_RETRIES", defaults.max_retries),
            base_delay: env_millis("REPRICER_RETRY_BASE_MS", defaults.base_delay),
            backoff_factor: defaults.backoff_factor,
            max_delay: env_millis("REPRICER_RETRY_MAX_MS", defaults.max_delay),
        }
    }

    /// Delay before the retry following attempt number `attempt`
    /// (zero-based): `base * factor^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Drives an async operation through the retry schedule. The schedule
/// is deterministic; no jitter, so two executors with the same policy
/// pace identically.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails fatally, or exhausts
    /// the budget. A fatal error propagates from the attempt that raised
    /// it with no delay; a persistently transient error is re-raised
    /// after `max_retries + 1` total attempts.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Classify + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.disposition() == Disposition::Fail || attempt >= self.policy.max_retries
                    {
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        target = "repricer.retry",
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retry_backoff"
                    );
                    metrics::retry_scheduled(attempt + 1, delay.as_millis() as u64);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
