//! Retry utilities with exponential backoff.
//!
//! The pipeline retries its whole miss path, never a single step, so the
//! operation passed here is one complete attempt.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry (doubles each retry).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of attempts (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base delay for exponential backoff.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay cap. Equal to the base delay for a fixed delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based).
    fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2u32.pow(exp));
        delay.min(self.max_delay)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed with a fatal error or after all attempts.
    Failed { error: E, attempts: u32 },
}

/// Execute an async operation with retry logic.
///
/// `operation` receives the 1-based attempt number. Errors for which
/// `should_retry` returns false end the loop immediately.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if attempt < config.max_attempts && should_retry(&e) => {
                let delay = config.delay_after_attempt(attempt);
                warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name,
                    attempt,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt,
                }
            }
        }
    }
}
