//! Retry utilities with backoff and jitter.
//!
//! Two schedules are used across the controllers:
//!
//! - exponential with jitter for multi-step operations that wait on other
//!   controllers, such as tenant teardown
//! - constant (250 ms, 12 attempts) for optimistic-concurrency conflicts on
//!   label writes, so concurrent project setups converge quickly
//!
//! # Example
//!
//! ```ignore
//! use ecm_common::retry::{retry_on_conflict, RetryConfig};
//!
//! retry_on_conflict(&RetryConfig::conflict(), "set_default_label", || async {
//!     label_template(&store, &ns, &name).await
//! })
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Delay between attempts when retrying conflicts
pub const CONFLICT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Attempts made before a conflict is surfaced
pub const CONFLICT_RETRY_ATTEMPTS: u32 = 12;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (1.0 = constant)
    pub backoff_multiplier: f64,
    /// Randomise each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fixed delay between a bounded number of attempts, no jitter
    pub fn constant(delay: Duration, attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// The schedule used for optimistic-concurrency conflicts
    pub fn conflict() -> Self {
        Self::constant(CONFLICT_RETRY_DELAY, CONFLICT_RETRY_ATTEMPTS)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }

    fn sleep_for(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * jitter)
    }
}

/// Execute an async operation, retrying every failure.
///
/// Retries indefinitely (or up to `max_attempts` if set) until success and
/// returns the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(config, operation_name, |_| true, operation).await
}

/// Execute an async operation, retrying only optimistic-concurrency conflicts.
///
/// Any other error is returned immediately.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    retry_when(config, operation_name, Error::is_conflict, operation).await
}

async fn retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let sleep = config.sleep_for(delay);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = sleep.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(sleep).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::constant(Duration::from_millis(1), attempts)
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result: Result<i32, &str> =
            retry_with_backoff(&fast(3), "op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = retry_with_backoff(&fast(5), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("fail")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = retry_with_backoff(&fast(3), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            }
        })
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    /// Story: two writers race on a label; the loser retries and converges
    #[tokio::test]
    async fn story_conflicts_are_retried_until_the_write_lands() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_on_conflict(&fast(12), "set_labels", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 4 {
                    Err(Error::conflict("Cluster", "edge-a", "object has been modified"))
                } else {
                    Ok("labelled")
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some("labelled"));
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_conflict_errors_are_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> = retry_on_conflict(&fast(12), "set_labels", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::not_found("Cluster", "ns", "edge-a"))
            }
        })
        .await;

        assert!(result.is_err_and(|e| e.is_not_found()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_conflict_schedule_is_constant() {
        let config = RetryConfig::conflict();
        assert_eq!(config.max_attempts, 12);
        assert_eq!(config.next_delay(config.initial_delay), CONFLICT_RETRY_DELAY);
        assert_eq!(config.sleep_for(CONFLICT_RETRY_DELAY), CONFLICT_RETRY_DELAY);
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let config = RetryConfig::default();
        let mut delay = config.initial_delay;
        for _ in 0..20 {
            delay = config.next_delay(delay);
        }
        assert_eq!(delay, config.max_delay);
    }
}
