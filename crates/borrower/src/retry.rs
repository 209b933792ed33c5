//! # Bounded Read Retry
//!
//! Connection-level retry for chain reads. Protocol-level retry is the next
//! scheduler tick, so this layer stays small: a fixed number of attempts,
//! exponential backoff, and an immediate stop on anything that is not a
//! transport failure.
//!
//! - `delay = initial_delay_ms * 2^(attempt-1)`, clamped to `max_delay_ms`
//! - Deterministic jitter: `+ (attempt * 7919 + 104729) % (delay/4 + 1)`
//! - Malformed responses are returned on the first attempt

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::chain::ChainError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts including the first; values below 1 are treated as 1.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

/// Delay before retry number `attempt` (1-indexed).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    let base = config
        .initial_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_delay_ms);

    let quarter = base / 4;
    if quarter == 0 {
        return base;
    }
    let jitter = (attempt as u64).wrapping_mul(7919).wrapping_add(104_729) % (quarter + 1);
    base.saturating_add(jitter).min(config.max_delay_ms)
}

/// Runs `operation` until it succeeds, fails with a non-transport error,
/// or the attempt budget is spent. The last error is returned.
pub async fn retry_read<F, Fut, T>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transport() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay_ms = compute_delay(config, attempt);
                warn!(attempt, max_attempts, delay_ms, error = %e, "retrying {}", what);
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}
