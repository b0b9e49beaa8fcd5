/// Polling utilities for waiting on conditions with a deadline and cancellation
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Configuration for polling operations
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub timeout: Duration,
    pub interval: Duration,
    /// Upper bound on condition checks, independent of the deadline
    pub max_attempts: Option<u32>,
    pub description: String,
}

impl PollingConfig {
    /// Create a new polling configuration
    pub fn new(timeout: Duration, interval: Duration, description: impl Into<String>) -> Self {
        Self {
            timeout,
            interval,
            max_attempts: None,
            description: description.into(),
        }
    }

    /// Cap the number of condition checks
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Poll until condition is met, the deadline passes, or `cancel` fires
    ///
    /// The condition function should return:
    /// - Ok(Some(T)) when condition is met (returns T)
    /// - Ok(None) when condition is not yet met (continues polling)
    /// - Err(e) when an error occurs (stops polling and returns error)
    ///
    /// Consecutive checks are separated by `interval`, except that the last
    /// sleep is cut short so a final check lands on the deadline. The wait
    /// never runs past `timeout`.
    pub async fn poll<F, Fut, T>(&self, cancel: &CancellationToken, mut condition: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        info!("{}...", self.description);

        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(self.description.clone()));
            }

            attempts += 1;
            if let Some(value) = condition().await? {
                info!("✓ {}", self.description);
                return Ok(value);
            }

            let out_of_attempts = self.max_attempts.is_some_and(|max| attempts >= max);
            let now = Instant::now();
            if out_of_attempts || now >= deadline {
                return Err(Error::Timeout {
                    description: self.description.clone(),
                    attempts,
                });
            }

            debug!(
                attempt = attempts,
                interval_ms = self.interval.as_millis() as u64,
                "{}: not yet, retrying",
                self.description
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled(self.description.clone()));
                }
                _ = tokio::time::sleep_until((now + self.interval).min(deadline)) => {}
            }
        }
    }
}
