//! Fixed-delay bounded retry for remote calls.

use std::fmt::Display;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Retry configuration: `attempts` tries in total, `delay` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no delay.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Check if another attempt follows `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts.max(1)
    }

    /// Run `f` until it succeeds or the budget is spent.
    ///
    /// Returns the last error on exhaustion. Cancellation during a delay
    /// stops retrying immediately.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt) => {
                    tracing::debug!(
                        operation,
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "Remote call failed; retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(self.delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
