//! Bounded retry with exponential backoff for repository calls.

use std::future::Future;
use std::time::Duration;

use crate::error::SyncError;
use crate::gateway::GatewayError;

/// Maximum number of retries for transient errors.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
    }

    /// Runs `op` until it succeeds, fails with an error `should_retry`
    /// rejects, or the retries are used up.
    ///
    /// Exhaustion surfaces as [`SyncError::RetriesExhausted`] carrying the
    /// last error; other failures come back as [`SyncError::Gateway`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        should_retry: impl Fn(&GatewayError) -> bool,
        mut op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.delay_for(attempt);
                log::info!(
                    "Retrying {} (attempt {}/{}) after {:?}...",
                    operation,
                    attempt + 1,
                    self.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if should_retry(&e) => {
                    if attempt >= self.max_retries {
                        log::error!(
                            "{} failed after {} attempts: {}",
                            operation,
                            attempt + 1,
                            e
                        );
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt + 1,
                            source: e,
                        });
                    }
                    log::warn!("{} failed with retryable error: {}", operation, e);
                    attempt += 1;
                }
                Err(e) => return Err(SyncError::Gateway(e)),
            }
        }
    }
}
