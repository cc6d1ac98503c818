// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the resolver core.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `energy_resolver_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `domain`: calculations, content, feature_flags, ...
//! - `source`: zone, certificate, pricing, footprint
//! - `outcome`: success, error, timeout, rejected, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache lookup (`hit` = served without a remote fetch)
pub fn record_cache_lookup(domain: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "energy_resolver_cache_lookups_total",
        "domain" => domain.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record a remote domain fetch issued by the cache
pub fn record_cache_fetch(domain: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    counter!(
        "energy_resolver_cache_fetches_total",
        "domain" => domain.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "energy_resolver_cache_fetch_seconds",
        "domain" => domain.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a read answered by something other than a fresh fetch
/// (`stale`, `snapshot`, `default`)
pub fn record_cache_fallback(domain: &str, kind: &str) {
    counter!(
        "energy_resolver_cache_fallbacks_total",
        "domain" => domain.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an explicit or pushed invalidation
pub fn record_cache_invalidation(domain: &str) {
    counter!(
        "energy_resolver_cache_invalidations_total",
        "domain" => domain.to_string()
    )
    .increment(1);
}

/// Record a formula evaluation outcome (`ok`, `absent`, `error`)
pub fn record_formula_evaluation(outcome: &str) {
    counter!(
        "energy_resolver_formula_evaluations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SNAPSHOT BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Record a per-domain sync outcome (`synced`, `fallback`, `failed`)
pub fn record_snapshot_domain(domain: &str, outcome: &str, items: usize) {
    counter!(
        "energy_resolver_snapshot_domains_total",
        "domain" => domain.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    gauge!(
        "energy_resolver_snapshot_items",
        "domain" => domain.to_string()
    )
    .set(items as f64);
}

/// Record a full sync run
pub fn record_snapshot_run(status: &str, duration: Duration) {
    counter!(
        "energy_resolver_snapshot_runs_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("energy_resolver_snapshot_run_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// AGGREGATOR SOURCES
// ═══════════════════════════════════════════════════════════════════════════

/// Record a source branch outcome (`success`, `cached`, `error`, `timeout`)
pub fn record_source_call(source: &str, outcome: &str) {
    counter!(
        "energy_resolver_source_calls_total",
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record source branch latency
pub fn record_source_latency(source: &str, duration: Duration) {
    histogram!(
        "energy_resolver_source_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a per-source cache lookup
pub fn record_source_cache(source: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "energy_resolver_source_cache_total",
        "source" => source.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record a full building profile resolution
pub fn record_profile_resolution(has_errors: bool, duration: Duration) {
    let status = if has_errors { "partial" } else { "complete" };
    counter!(
        "energy_resolver_profiles_total",
        "status" => status
    )
    .increment(1);
    histogram!("energy_resolver_profile_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "energy_resolver_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records source latency on drop
pub struct LatencyTimer {
    source: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_source_latency(self.source, self.start.elapsed());
    }
}
