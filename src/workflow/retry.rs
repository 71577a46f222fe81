//! Bounded retry with exponential backoff for model calls.
//!
//! Only retryable errors (rate limits, transient network trouble) are retried.
//! The delay before retry `n` is `base * 2^(n-1)`, capped at `max`, and never
//! shorter than a server-provided `retry-after`.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::llm::LlmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// Failure after the retry budget was spent (or on a fatal error)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted {
    pub error: LlmError,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base.saturating_mul(2u32.pow(exponent)).min(self.max);
        match error.retry_after() {
            Some(retry_after) => backoff.max(retry_after),
            None => backoff,
        }
    }

    /// Run `call` until it succeeds, fails fatally, or attempts run out.
    /// Returns the value and the number of attempts used.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<(T, u32), RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if error.is_retryable() && attempt < self.max_attempts() => {
                    let delay = self.delay_for(attempt, &error);
                    tracing::warn!(
                        stage = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(RetryExhausted { error, attempts: attempt }),
            }
        }
    }
}
