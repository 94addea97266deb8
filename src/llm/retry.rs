//! Retry policy for generator calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::GeneratorConfig;
use crate::error::GenerationError;

/// Per-attempt timeout plus exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    backoff_base: Duration,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_base: Duration, call_timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_base,
            call_timeout,
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.retry_attempts, config.backoff_base, config.call_timeout)
    }

    /// Run `op` until it succeeds, fails non-retryably, or the attempt
    /// budget runs out. Each attempt gets its own timeout.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut last: Option<GenerationError> = None;

        for attempt in 1..=self.attempts {
            let result = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(GenerationError::Timeout {
                    timeout: self.call_timeout,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) && attempt < self.attempts => {
                    let delay = self.backoff_delay(attempt, &err);
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Generator call failed, retrying"
                    );
                    last = Some(err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) if is_retryable(&err) => {
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(GenerationError::BudgetExhausted {
            attempts: self.attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Exponential backoff doubled per attempt, plus up to 50% jitter.
    /// A rate-limit hint from the server overrides the computed delay.
    fn backoff_delay(&self, attempt: u32, err: &GenerationError) -> Duration {
        if let GenerationError::RateLimited {
            retry_after: Some(after),
        } = err
        {
            return *after;
        }
        let base = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt - 1));
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }
}

fn is_retryable(err: &GenerationError) -> bool {
    matches!(
        err,
        GenerationError::RequestFailed { .. }
            | GenerationError::RateLimited { .. }
            | GenerationError::Timeout { .. }
    )
}
