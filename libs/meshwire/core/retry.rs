//! Retry with exponential backoff and jitter
//!
//! Delay before attempt `n + 1` (after `n` failures):
//!
//! ```text
//! base  = min(max_delay, initial_delay * backoff_factor^(n - 1))
//! delay = base + uniform(0, base * jitter_factor)
//! ```
//!
//! A policy gives up when the error is not retryable, when `max_attempts`
//! have been made, or when the overall `timeout` has elapsed.

use crate::core::config::RetryConfig;
use crate::error::{MeshError, Result};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Custom classification of errors worth retrying
pub type RetryPredicate = Arc<dyn Fn(&MeshError) -> bool + Send + Sync + 'static>;

/// Result of a successful [`RetryPolicy::with_retry`] run
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Time spent sleeping between attempts
    pub total_delay: Duration,
}

/// Backoff schedule and give-up rules
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of the base delay added as uniform random jitter
    pub jitter_factor: f64,
    /// Overall budget across all attempts and sleeps
    pub timeout: Duration,
    is_retryable: Option<RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            backoff_factor,
            jitter_factor: 0.0,
            timeout: Duration::from_secs(30),
            is_retryable: None,
        }
    }

    /// Policy that tries exactly once
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.max(0.0);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace [`MeshError::is_retryable`] with a custom predicate
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MeshError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Some(Arc::new(predicate));
        self
    }

    /// Delay after failed attempt `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !scaled.is_finite() || scaled >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Delay after failed attempt `attempt` (1-based), with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let jitter = base.as_secs_f64() * self.jitter_factor * rand::random::<f64>();
        base + Duration::from_secs_f64(jitter)
    }

    fn should_retry(&self, error: &MeshError) -> bool {
        match self.is_retryable {
            Some(ref predicate) => predicate(error),
            None => error.is_retryable(),
        }
    }

    /// Run `op` until it succeeds or the policy gives up
    ///
    /// `op` receives the 1-based attempt number.
    pub fn with_retry<T, F>(&self, op: F) -> Result<RetryOutcome<T>>
    where
        F: FnMut(u32) -> Result<T>,
    {
        self.with_retry_interruptible(op, |delay| {
            thread::sleep(delay);
            true
        })
    }

    /// As [`with_retry`](Self::with_retry) with a caller-supplied sleep
    ///
    /// `sleep` returns `false` to abort, in which case the run fails with
    /// `Cancelled`.
    pub fn with_retry_interruptible<T, F, S>(&self, mut op: F, mut sleep: S) -> Result<RetryOutcome<T>>
    where
        F: FnMut(u32) -> Result<T>,
        S: FnMut(Duration) -> bool,
    {
        let started = Instant::now();
        let mut total_delay = Duration::ZERO;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op(attempt) {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                        total_delay,
                    })
                }
                Err(e) => e,
            };

            if !self.should_retry(&error) {
                debug!("Attempt {} failed with non-retryable error: {}", attempt, error);
                return Err(error);
            }
            if attempt >= self.max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return Err(MeshError::MaxRetriesExceeded {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                warn!("Retry budget of {:?} exhausted after {} attempts", self.timeout, attempt);
                return Err(MeshError::RetryTimeout {
                    attempts: attempt,
                    budget_ms: self.timeout.as_millis() as u64,
                    last_error: error.to_string(),
                });
            }

            // Never sleep past the overall budget
            let delay = self.delay_for(attempt).min(self.timeout - elapsed);
            debug!("Attempt {} failed ({}), retrying in {:?}", attempt, error, delay);
            if !sleep(delay) {
                return Err(MeshError::Cancelled(format!(
                    "retry aborted after {} attempts",
                    attempt
                )));
            }
            total_delay += delay;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
        )
        .with_jitter(config.jitter_factor)
        .with_timeout(Duration::from_millis(config.timeout_ms))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter_factor", &self.jitter_factor)
            .field("timeout", &self.timeout)
            .field("custom_predicate", &self.is_retryable.is_some())
            .finish()
    }
}
