use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::EngineError;

/// Sliding-window requests-per-minute limiter for language-model calls.
/// A denied caller waits for the window to open rather than failing, up
/// to `max_wait`; past that it surfaces `RateLimitExceeded` so only the
/// one question is affected.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    max_wait: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration, max_wait: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            max_wait,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_requests: usize, max_wait: Duration) -> Self {
        Self::new(max_requests, Duration::from_secs(60), max_wait)
    }

    pub async fn acquire(&self) -> Result<(), EngineError> {
        let started = Instant::now();
        loop {
            let wait = {
                let mut requests = self.requests.lock().await;
                let now = Instant::now();
                while let Some(front) = requests.front() {
                    if now.duration_since(*front) > self.window {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }
                if requests.len() < self.max_requests {
                    requests.push_back(now);
                    return Ok(());
                }
                // Oldest request leaving the window opens a slot.
                let oldest = *requests
                    .front()
                    .ok_or_else(|| EngineError::Config("rate limiter window empty".into()))?;
                self.window.saturating_sub(now.duration_since(oldest))
                    + Duration::from_millis(100)
            };

            let waited = started.elapsed();
            if waited + wait > self.max_wait {
                return Err(EngineError::RateLimitExceeded {
                    waited_ms: waited.as_millis() as u64,
                });
            }
            log::info!("Rate limit reached, waiting {:?} for a slot", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests still counted inside the current window.
    pub async fn in_flight(&self) -> usize {
        let requests = self.requests.lock().await;
        let now = Instant::now();
        requests
            .iter()
            .filter(|t| now.duration_since(**t) <= self.window)
            .count()
    }
}
