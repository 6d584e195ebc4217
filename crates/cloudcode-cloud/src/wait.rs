//! Wait primitives
//!
//! Two shapes of waiting show up everywhere in provisioning:
//!
//! - [`poll_until`]: ask the cloud for a resource's state at a fixed interval
//!   until it reaches a target (instance running, snapshot ready).
//! - [`retry_with_backoff`]: retry a fallible action with growing gaps until
//!   it succeeds (opening an SSH session to a fresh machine).
//!
//! Both anchor a monotonic deadline on first invocation and bound each
//! individual attempt by that same deadline. Dropping the returned future
//! cancels the wait.

use crate::error::{CloudError, Result};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout_at};

/// Fixed-interval polling configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_interval: Duration,

    /// Upper bound for a single delay
    pub max_interval: Duration,

    /// Total time budget, measured from the first attempt
    pub timeout: Duration,

    /// Backoff multiplier
    pub multiplier: f64,
}

impl BackoffConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay to wait after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let delay = self.initial_interval.mul_f64(factor);
        delay.min(self.max_interval)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2 * 60),
            multiplier: 2.0,
        }
    }
}

/// Poll `check` until it yields a value.
///
/// `Ok(None)` means "not yet". Errors are treated as transient: they are
/// logged, remembered and the poll continues. The last one is reported if
/// the deadline passes.
pub async fn poll_until<T, F, Fut>(operation: &str, config: &PollConfig, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut last_error: Option<String> = None;

    loop {
        match timeout_at(deadline, check()).await {
            Ok(Ok(Some(value))) => return Ok(value),
            Ok(Ok(None)) => {
                tracing::debug!("Waiting for {}", operation);
            }
            Ok(Err(e)) => {
                tracing::debug!("Transient error while waiting for {}: {}", operation, e);
                last_error = Some(e.to_string());
            }
            Err(_) => break,
        }

        if Instant::now() >= deadline {
            break;
        }
        sleep_until((Instant::now() + config.interval).min(deadline)).await;
    }

    Err(CloudError::WaitTimeout {
        operation: operation.to_string(),
        timeout: config.timeout,
        last_error,
    })
}

/// Retry `attempt` with exponential backoff until it succeeds.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: &str,
    config: &BackoffConfig,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let deadline = Instant::now() + config.timeout;
    let mut last_error = String::from("no attempt completed");
    let mut failures: u32 = 0;

    loop {
        match timeout_at(deadline, attempt()).await {
            Ok(Ok(value)) => {
                if failures > 0 {
                    tracing::debug!("{} succeeded after {} retries", operation, failures);
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                last_error = e.to_string();
                tracing::debug!("{} attempt {} failed: {}", operation, failures + 1, last_error);
            }
            Err(_) => {
                last_error = if failures == 0 {
                    "attempt did not finish before the deadline".to_string()
                } else {
                    format!("{} (last attempt did not finish before the deadline)", last_error)
                };
                break;
            }
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep_until((now + config.delay_for_attempt(failures)).min(deadline)).await;
        failures += 1;
    }

    Err(CloudError::ConnectTimeout {
        operation: operation.to_string(),
        timeout: config.timeout,
        last_error,
    })
}
