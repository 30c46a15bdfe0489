//! Bounded retry with error classification.
//!
//! Only errors classified retryable at construction are re-attempted; any
//! other error terminates immediately. On exhaustion the last error is
//! surfaced.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::domain::errors::{ControlError, ControlResult};

/// Delay growth strategy across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant,
    Linear,
    Exponential,
}

/// Retry policy: delay for attempt `i` is `min(max_delay_ms, f(base_delay_ms, i))`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self { max_retries, backoff, base_delay_ms, max_delay_ms }
    }

    /// Policy from the controller retry configuration.
    pub fn from_config(config: &crate::domain::models::config::RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::Exponential,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Execute `operation` with retries for retryable errors.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> ControlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.retryable() || attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delay before the attempt following `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = match self.backoff {
            Backoff::Constant => self.base_delay_ms,
            Backoff::Linear => self
                .base_delay_ms
                .saturating_mul(u64::from(attempt).saturating_add(1)),
            Backoff::Exponential => self
                .base_delay_ms
                .saturating_mul(2_u64.saturating_pow(attempt)),
        };
        Duration::from_millis(raw.min(self.max_delay_ms))
    }
}

/// Convenience wrapper mapping any error into a classified transient.
pub fn transient(err: impl std::fmt::Display) -> ControlError {
    ControlError::Transient(err.to_string())
}
