//! Bounded exponential backoff for collaborator calls.
//!
//! Only [`ErrorKind::Transient`] failures are retried. Permanent failures
//! come back on the first attempt, and an exhausted budget returns the last
//! transient error so the caller can log it and abandon the handler.
//!
//! Default: 3 retries after the first attempt, waiting 2s, 4s, 8s.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::{ErrorKind, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap on a single delay.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
    };

    /// A single attempt, no retries.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the retry budget
/// is spent.
///
/// `operation` is called afresh for every attempt, so it must be safe to
/// repeat. Callers pass `move` closures over shared references.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind == ErrorKind::Permanent => return Err(e),
            Err(e) => {
                if attempt >= config.max_retries {
                    warn!(
                        operation = e.operation,
                        attempts = attempt + 1,
                        error = %e,
                        "retries exhausted"
                    );
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                debug!(operation = e.operation, ?delay, error = %e, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
