//! Bounded retry with exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry settings for calls to external services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// Only errors for which `is_transient` returns true are retried. The last
    /// error is returned unchanged.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        label: &str,
        is_transient: P,
        mut operation: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        label,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
