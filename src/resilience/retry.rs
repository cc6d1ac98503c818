// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Remote store calls fail transiently (connection resets, pool exhaustion)
//! and permanently (a table that does not exist). [`retry_if`] only retries
//! errors the caller classifies as transient.
//!
//! # Example
//!
//! ```
//! use energy_resolver::RetryConfig;
//!
//! // Startup: connect to the store, fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, 5);
//!
//! // Query: a single domain fetch during sync
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, 3);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for operation retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, including the first one
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Fast-fail retry for the initial store connection.
    /// 5 attempts, failing after roughly 5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Per-domain fetch during a snapshot sync: 3 attempts, then the
    /// domain is recorded as failed.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }

    /// Minimal delays for tests
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Retry every error.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Retry only errors for which `is_transient` returns true.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if !is_transient(&err) || attempts >= config.max_retries {
                    return Err(err);
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, config.max_retries, err, delay
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
