//! Retry policy for engine commands
//!
//! Transient network failures get retried with exponential backoff; anything
//! else propagates on the first attempt. The transient classification lives
//! on [`ClError`] so the whole bridge agrees on it.

use std::future::Future;
use std::time::Duration;

use cl_core::{AdapterConfig, ClError, ClResult};

/// Exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
            backoff: config.retry_backoff,
        }
    }

    /// Delay before retrying after `attempt` (0-based) failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff.powi(attempt as i32);
        self.delay.mul_f64(factor.max(0.0))
    }

    /// Worst-case wall time of a fully retried operation
    ///
    /// Callers can pass a shorter deadline to [`RetryPolicy::run`] via their
    /// own timeout wrapper; this is the default bound.
    pub fn overall_deadline(&self) -> Duration {
        let mut total = Duration::ZERO;
        for attempt in 0..self.max_attempts.saturating_sub(1) {
            total += self.delay_for(attempt);
        }
        total
    }

    /// Run `op` with retries on transient errors
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> ClResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ClResult<T>>,
    {
        let mut last_message = String::new();

        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    last_message = e.to_string();
                    if attempt + 1 < self.max_attempts {
                        let delay = self.delay_for(attempt);
                        log::warn!(
                            "[Adapter] {label} attempt {} failed ({last_message}), retrying in {:?}",
                            attempt + 1,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClError::Transient(format!(
            "Command failed after {} attempts: {last_message}",
            self.max_attempts
        )))
    }
}
