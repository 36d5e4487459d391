use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::event_store::EventStoreError;

/// Bounded retry with linear backoff: attempt `n` (0-based) waits `base_backoff * (n + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(attempt.saturating_add(1))
    }

    /// Run a store operation, retrying [`transient`](EventStoreError::is_transient) failures.
    pub async fn retry_transient<T, F, Fut>(
        &self,
        operation: &'static str,
        mut f: F,
    ) -> Result<T, EventStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EventStoreError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    warn!(operation, attempt, error = %err, ?wait, "transient store failure, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
