//! Bounded retry with exponential backoff.
//!
//! Every broker call made by the producer and by the acknowledger goes
//! through [`with_retry`]. An operation is attempted at most
//! `max_retries + 1` times; between attempts the loop optionally sleeps for
//! `min(base * 2^attempt, max)` milliseconds with ±10% jitter.
//!
//! ## Main Components
//!
//! - [`RetryPolicy`]: retry ceiling and delay bounds
//! - [`with_retry`]: runs an operation under a policy
//! - [`calculate_retry_delay`]: exponential backoff with jitter
use std::{fmt::Display, future::Future, time::Duration};

use log::{debug, error, warn};
use rand::Rng;
use thiserror::Error;

use crate::{
    config::{ConfigError, QueueConfig},
    constants::{
        DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
        RETRY_JITTER_PERCENT,
    },
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryError<E> {
    #[error("'{operation}' failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: String,
        attempts: usize,
        last_error: E,
    },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Calculate the retry delay using exponential backoff with jitter
///
/// # Arguments
/// * `attempt` - The retry attempt number (0 = first retry)
/// * `base_delay_ms` - Base delay in milliseconds
/// * `max_delay_ms` - Maximum delay in milliseconds
pub fn calculate_retry_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    if base_delay_ms == 0 || max_delay_ms == 0 {
        return Duration::ZERO;
    }

    let exp_backoff = if attempt > 63 {
        max_delay_ms
    } else {
        let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        base_delay_ms.saturating_mul(multiplier)
    };

    apply_jitter(exp_backoff.min(max_delay_ms))
}

/// Randomizes `delay_ms` within `delay_ms × (1 ± RETRY_JITTER_PERCENT)`.
fn apply_jitter(delay_ms: u64) -> Duration {
    if delay_ms == 0 {
        return Duration::ZERO;
    }

    let jitter_range = (delay_ms as f64 * RETRY_JITTER_PERCENT).floor() as u64;
    if jitter_range == 0 {
        return Duration::from_millis(delay_ms);
    }

    let mut rng = rand::rng();
    let jitter_value = rng.random_range(0..=jitter_range);

    let final_delay = if rng.random_bool(0.5) {
        delay_ms.saturating_add(jitter_value)
    } else {
        delay_ms.saturating_sub(jitter_value)
    };

    Duration::from_millis(final_delay)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Zero disables delays between attempts.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay values must both be zero (no delays) or both non-zero with
    /// `max_delay_ms >= base_delay_ms`.
    pub fn new(
        max_retries: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Result<Self, ConfigError> {
        if (base_delay_ms == 0) != (max_delay_ms == 0) {
            return Err(ConfigError::invalid(
                "retry delays",
                format!(
                    "must be both zero or both non-zero, got base_delay_ms={}, max_delay_ms={}",
                    base_delay_ms, max_delay_ms
                ),
            ));
        }
        if max_delay_ms < base_delay_ms {
            return Err(ConfigError::invalid(
                "retry_max_delay_ms",
                format!(
                    "max_delay_ms ({}) must be >= base_delay_ms ({})",
                    max_delay_ms, base_delay_ms
                ),
            ));
        }

        Ok(Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        })
    }

    /// Retries without sleeping between attempts.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.max_retries,
            config.retry_base_delay_ms,
            config.retry_max_delay_ms,
        )
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    pub fn delay_for(&self, retry: usize) -> Duration {
        let attempt = u32::try_from(retry).unwrap_or(u32::MAX);
        calculate_retry_delay(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

/// Runs `operation` until it succeeds or `policy.max_retries + 1` attempts
/// have failed.
///
/// # Arguments
/// * `operation_name` - Name of the operation for logging
/// * `policy` - Retry ceiling and backoff bounds
/// * `operation` - Produces a fresh future for every attempt
pub async fn with_retry<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        "'{}' succeeded on attempt {}/{}",
                        operation_name, attempts, max_attempts
                    );
                }
                return Ok(result);
            }
            Err(e) if attempts >= max_attempts => {
                error!(
                    "'{}' failed after {} attempts: {}",
                    operation_name, attempts, e
                );
                return Err(RetryError::Exhausted {
                    operation: operation_name.to_string(),
                    attempts,
                    last_error: e,
                });
            }
            Err(e) => {
                warn!(
                    "'{}' failed (attempt {}/{}): {}",
                    operation_name, attempts, max_attempts, e
                );
                let delay = policy.delay_for(attempts - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
