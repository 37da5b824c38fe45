use std::future::Future;
use std::time::Duration;

use crate::error::EngineError;

/// Bounded retry with exponential backoff for provider calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Runs `op`, retrying transient failures up to the policy's attempt
/// limit. Non-transient errors (format, config, rate limit) surface
/// immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt - 1);
                log::warn!(
                    "Transient failure (attempt {}/{}): {}; retrying in {:?}",
                    attempt,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
