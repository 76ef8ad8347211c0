use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{RagError, RagResult};

/// Bounded exponential backoff for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub base_delay: Duration,

    /// Growth factor applied to the delay after every failed attempt
    pub multiplier: f64,

    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Defaults: 3 attempts, 500ms base delay, multiplier 2, capped at 5s
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Non-transient errors are returned as-is on the attempt that produced
    /// them. Running out of attempts yields [`RagError::RetryExhausted`]
    /// wrapping the last transient error.
    pub async fn run<F, Fut, T>(&self, name: &str, mut operation: F) -> RagResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RagResult<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        operation = name,
                        attempts = attempt,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(RagError::RetryExhausted {
                        attempts: attempt,
                        last_error: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        operation = name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}
