//! Retry strategy with exponential backoff for failed fetches.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use rox_common::Result;

/// Fetch retry policy.
///
/// Backoff grows from `initial_delay` by `backoff_multiplier` per retry and
/// is capped at `max_delay`. With `jitter` each wait is spread by up to 25%
/// either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl RetryConfig {
    /// `max_retries` retries, waiting 500ms first and doubling up to 30s.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before retry number `retry`, counting from zero.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let grown = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = grown.min(self.max_delay.as_secs_f64());
        let spread = if self.jitter {
            0.75 + rand::random::<f64>() * 0.5
        } else {
            1.0
        };
        Duration::try_from_secs_f64(capped * spread).unwrap_or(self.max_delay)
    }
}

/// No retries: a failing fetch surfaces on the first attempt.
impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Runs an operation, retrying errors for which
/// [`Error::is_retryable`](rox_common::Error::is_retryable) holds.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation with retry logic.
    ///
    /// Non-retryable errors return immediately. After `max_retries` retries
    /// the last error is returned.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "Fetch succeeded after retrying");
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt > self.config.max_retries {
                        if self.config.max_retries > 0 {
                            warn!(
                                "Fetch failed after {} retries: {}",
                                self.config.max_retries, err
                            );
                        }
                        return Err(err);
                    }

                    let delay = self.config.backoff(attempt - 1);
                    warn!(
                        "Fetch attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
