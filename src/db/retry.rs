//! Retry with linear backoff for connection acquisition.
//!
//! Only transient failures are retried. Statements themselves are never
//! re-run through this path.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::db::error::{DbError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Base delay; attempt `n` waits `delay * n` before the next try.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay * attempt
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Exhaustion is reported as
    /// [`DbError::Acquisition`] carrying the last underlying message.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> DbResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_message = String::new();

        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "Connection attempt failed");
                    last_message = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(DbError::Acquisition {
            attempts,
            message: last_message,
        })
    }
}
