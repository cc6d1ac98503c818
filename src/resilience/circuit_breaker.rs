// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker pattern using recloser crate.
//!
//! Each external source behind the aggregator (certificate lookup, pricing,
//! footprint geometry) gets its own breaker. When a source keeps failing the
//! breaker opens and further calls fail immediately, so a dead service costs
//! nothing instead of a full branch timeout on every building query.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Service unhealthy, requests fail-fast without attempting
//! - HalfOpen: Testing if service recovered, limited requests allowed

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use tracing::{debug, warn};

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failure rate (0.0 - 1.0) over the closed window that trips the circuit
    pub error_rate: f32,
    /// Number of calls in the closed-state window
    pub window: usize,
    /// Number of trial calls allowed while half-open
    pub half_open_calls: usize,
    /// How long to stay open before probing again
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            error_rate: 0.5,
            window: 10,
            half_open_calls: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Lenient config for cheap, flaky services (public geospatial mirrors)
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            error_rate: 0.8,
            window: 20,
            half_open_calls: 1,
            recovery_timeout: Duration::from_secs(15),
        }
    }

    /// Trips quickly, for tests
    #[must_use]
    pub fn test() -> Self {
        Self {
            error_rate: 0.5,
            window: 2,
            half_open_calls: 1,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// A named circuit breaker with call accounting
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.error_rate)
            .closed_len(config.window)
            .half_open_len(config.half_open_calls)
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an async operation through the circuit breaker.
    ///
    /// `f` is always invoked to build the future. When the circuit is open
    /// that future is dropped without being polled, so an `async` body never
    /// runs, but work done eagerly inside `f` itself does.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.inner.call(f()).await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call succeeded");
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_call(&self.name, "rejected");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call failed");
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Failure rate (0.0 - 1.0) over all calls seen
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}

/// One breaker per external aggregator source
pub struct SourceCircuits {
    pub certificate: CircuitBreaker,
    pub pricing: CircuitBreaker,
    pub footprint: CircuitBreaker,
}

impl Default for SourceCircuits {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceCircuits {
    #[must_use]
    pub fn new() -> Self {
        Self {
            certificate: CircuitBreaker::new("certificate", CircuitConfig::default()),
            pricing: CircuitBreaker::new("pricing", CircuitConfig::default()),
            // Public Overpass mirrors are slow and flaky; tolerate more
            footprint: CircuitBreaker::new("footprint", CircuitConfig::lenient()),
        }
    }

    /// Same config for every source
    #[must_use]
    pub fn with_config(config: CircuitConfig) -> Self {
        Self {
            certificate: CircuitBreaker::new("certificate", config.clone()),
            pricing: CircuitBreaker::new("pricing", config.clone()),
            footprint: CircuitBreaker::new("footprint", config),
        }
    }
}
