use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Terminal failure after every attempt was consumed, wrapping the last
/// underlying error.
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempt(s): {source}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub source: anyhow::Error,
}

/// Bounded retry with a fixed pause between attempts.
///
/// The pause suspends only the calling task; other virtual users keep
/// running. HTTP-level error statuses are not routed through here - only
/// transport failures surfaced as `Err` by the wrapped operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Always attempt at least once, even if misconfigured with 0.
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt == max_attempts {
                        return Err(RetryExhausted {
                            attempts: max_attempts,
                            source: err,
                        });
                    }
                    warn!(
                        attempt,
                        retry_in_seconds = self.interval.as_secs_f64(),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    sleep(self.interval).await;
                }
            }
        }

        unreachable!("retry loop always returns from its final attempt")
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(5),
        }
    }
}
