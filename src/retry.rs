//! Generic exponential-backoff retry helper.
//!
//! The tracker's own connection back-off (§4.1, §4.7) is deliberately *not* built on this
//! helper — its bound (5 attempts, ×5 multiplier, 5 min initial wait) is fixed by the spec, not
//! user-configurable, and lives as [`crate::db::ConnectRetryPolicy`] instead. This helper backs
//! the transport retry loop in `download.rs`, where the per-source attempt count is configurable
//! (`-m`).

use std::future::Future;
use std::time::Duration;

use rand::Rng;

pub use crate::error::IsRetryable;

/// Exponential backoff parameters for a retried operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Delay is never allowed to exceed this.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Whether to add random jitter (0-100% of the delay) to avoid thundering-herd retries.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Run `operation` with exponential backoff, retrying only while the error is
/// [`IsRetryable::is_retryable`] and the attempt budget remains.
pub async fn with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                let wait = if config.jitter { add_jitter(delay) } else { delay };
                tracing::warn!(error = %e, attempt, delay_ms = wait.as_millis(), "retrying");
                tokio::time::sleep(wait).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                    .min(config.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
