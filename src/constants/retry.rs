//! Retry defaults shared by publish, ack and nack.

pub const DEFAULT_MAX_RETRIES: usize = 200;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Jitter applied to each backoff delay, as a fraction of the delay.
pub const RETRY_JITTER_PERCENT: f64 = 0.1;
