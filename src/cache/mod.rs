// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-through configuration cache.
//!
//! Each [`ConfigDomain`] is memoized whole for its TTL. A read of a fresh
//! domain never touches the remote store; a read of an absent or expired
//! domain refetches the entire domain and swaps it in atomically.
//!
//! ```text
//!   absent ──fetch ok──► fresh ──ttl / invalidate──► stale ──fetch ok──► fresh
//!     │                                                │
//!     └─fetch err─► snapshot ─► default ─► error       └─fetch err─► served stale
//! ```
//!
//! Only one refresh per domain runs at a time. Concurrent readers of an
//! expired domain wait for it and then read the new entry.

pub mod defaults;
pub mod entry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::domain::{
    normalize_municipality_code, ConfigDomain, DomainMap, HeatSource, Municipality, TekRequirement,
};
use crate::formula::{Bindings, CompiledFormula, FormulaError};
use crate::snapshot::{SnapshotError, SnapshotLoader};
use crate::store::{ChangeEvent, RemoteStore, StoreError};

pub use entry::{DomainEntry, Freshness, Origin, Served};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// The domain was never loaded and nothing can stand in for it.
    #[error("{domain} unavailable: {source}")]
    SourceUnavailable {
        domain: ConfigDomain,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error("malformed {domain} record '{key}': {message}")]
    Malformed {
        domain: ConfigDomain,
        key: String,
        message: String,
    },
}

/// Display language for content lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Norwegian,
    English,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub fetch_errors: u64,
    pub stale_serves: u64,
    pub fallbacks: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    stale_serves: AtomicU64,
    fallbacks: AtomicU64,
    invalidations: AtomicU64,
}

pub struct ConfigCache {
    store: Arc<dyn RemoteStore>,
    ttls: [Duration; ConfigDomain::ALL.len()],
    entries: DashMap<ConfigDomain, Arc<DomainEntry>>,
    refresh_locks: [Mutex<()>; ConfigDomain::ALL.len()],
    counters: Counters,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn RemoteStore>, config: &ResolverConfig) -> Self {
        Self {
            store,
            ttls: ConfigDomain::ALL.map(|d| config.domain_ttl(d)),
            entries: DashMap::new(),
            refresh_locks: std::array::from_fn(|_| Mutex::new(())),
            counters: Counters::default(),
        }
    }

    /// Same TTL for every domain.
    pub fn with_ttl(store: Arc<dyn RemoteStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttls: [ttl; ConfigDomain::ALL.len()],
            entries: DashMap::new(),
            refresh_locks: std::array::from_fn(|_| Mutex::new(())),
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn ttl(&self, domain: ConfigDomain) -> Duration {
        self.ttls[domain as usize]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Core read path
    // ═══════════════════════════════════════════════════════════════════════

    /// Value for `key` in `domain`. `Ok(None)` means the domain loaded but
    /// has no such key.
    pub async fn get(&self, domain: ConfigDomain, key: &str) -> Result<Option<Value>, ResolveError> {
        Ok(self.get_served(domain, key).await?.value)
    }

    /// Like [`get`](Self::get), with provenance.
    pub async fn get_served(
        &self,
        domain: ConfigDomain,
        key: &str,
    ) -> Result<Served<Option<Value>>, ResolveError> {
        let served = self.domain(domain).await?;
        Ok(served.map(|entry| entry.map.get(key).cloned()))
    }

    /// The whole domain map currently served for `domain`.
    pub async fn domain_map(&self, domain: ConfigDomain) -> Result<Served<Arc<DomainMap>>, ResolveError> {
        Ok(self.domain(domain).await?.map(|entry| entry.map.clone()))
    }

    async fn domain(&self, domain: ConfigDomain) -> Result<Served<Arc<DomainEntry>>, ResolveError> {
        if let Some(entry) = self.fresh_entry(domain) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_lookup(domain.as_str(), true);
            return Ok(Served {
                value: entry,
                freshness: Freshness::Fresh,
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_lookup(domain.as_str(), false);

        let _guard = self.refresh_locks[domain as usize].lock().await;

        // Another caller may have refreshed while we waited
        if let Some(entry) = self.fresh_entry(domain) {
            return Ok(Served {
                value: entry,
                freshness: Freshness::Fresh,
            });
        }

        match self.fetch(domain).await {
            Ok(map) => {
                let entry = Arc::new(DomainEntry::new(domain, map, self.ttl(domain), Origin::Remote));
                self.entries.insert(domain, entry.clone());
                debug!(domain = %domain, items = entry.map.len(), "Domain refreshed");
                Ok(Served {
                    value: entry,
                    freshness: Freshness::Fresh,
                })
            }
            Err(err) => self.fall_back(domain, err),
        }
    }

    fn fresh_entry(&self, domain: ConfigDomain) -> Option<Arc<DomainEntry>> {
        let entry = self.entries.get(&domain)?.value().clone();
        entry.is_fresh(Instant::now()).then_some(entry)
    }

    async fn fetch(&self, domain: ConfigDomain) -> Result<DomainMap, StoreError> {
        let start = std::time::Instant::now();
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let result = self.store.fetch_rows(domain).await.map(|rows| domain.keyed_map(rows));

        crate::metrics::record_cache_fetch(domain.as_str(), result.is_ok(), start.elapsed());
        if result.is_err() {
            self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Refresh failed: last entry of any origin, then defaults, then error.
    fn fall_back(&self, domain: ConfigDomain, err: StoreError) -> Result<Served<Arc<DomainEntry>>, ResolveError> {
        if let Some(entry) = self.entries.get(&domain).map(|e| e.value().clone()) {
            let freshness = entry.fallback_freshness();
            if freshness == Freshness::Stale {
                self.counters.stale_serves.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            }
            warn!(domain = %domain, error = %err, ?freshness, "Refresh failed, serving last known data");
            crate::metrics::record_cache_fallback(domain.as_str(), freshness_label(freshness));
            return Ok(Served { value: entry, freshness });
        }

        if let Some(map) = defaults::hardcoded(domain) {
            let entry = Arc::new(DomainEntry::new(domain, map, self.ttl(domain), Origin::Default));
            self.entries.insert(domain, entry.clone());
            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            warn!(domain = %domain, error = %err, "Remote unavailable on cold start, using hardcoded defaults");
            crate::metrics::record_cache_fallback(domain.as_str(), "default");
            return Ok(Served {
                value: entry,
                freshness: Freshness::Default,
            });
        }

        warn!(domain = %domain, error = %err, "Domain unavailable and never loaded");
        Err(ResolveError::SourceUnavailable { domain, source: err })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Invalidation
    // ═══════════════════════════════════════════════════════════════════════

    /// Force the next read of `domain` to refetch. Other domains are untouched.
    ///
    /// The current data is kept only as a fallback for a failing refetch; it
    /// is never served as fresh again.
    pub fn invalidate(&self, domain: ConfigDomain) {
        if let Some(mut slot) = self.entries.get_mut(&domain) {
            let expired = Arc::new(slot.value().expired());
            *slot = expired;
        }
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_invalidation(domain.as_str());
        debug!(domain = %domain, "Domain invalidated");
    }

    pub fn invalidate_all(&self) {
        for domain in ConfigDomain::ALL {
            self.invalidate(domain);
        }
    }

    /// Apply change events until the channel closes or the cache is dropped.
    /// A lagged receiver may have missed events, so everything is invalidated.
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<ChangeEvent>,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Invalidation listener lagged");
                        ChangeEvent::All
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(cache) = cache.upgrade() else { break };
                match event {
                    ChangeEvent::Domain(domain) => cache.invalidate(domain),
                    ChangeEvent::All => cache.invalidate_all(),
                }
            }
            debug!("Invalidation listener stopped");
        })
    }

    /// Listen to the store's own change feed, if it has one.
    pub fn listen_to_store(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let rx = self.store.subscribe()?;
        Some(self.spawn_invalidation_listener(rx))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Snapshot seeding
    // ═══════════════════════════════════════════════════════════════════════

    /// Install verified snapshot data for domains that have no entry yet.
    /// Returns how many domains were seeded.
    pub async fn seed_from_snapshot(&self, loader: &SnapshotLoader) -> Result<usize, SnapshotError> {
        let verified = loader.load_verified().await?;
        let mut seeded = 0;
        for (domain, map) in verified {
            let entry = Arc::new(DomainEntry::new(domain, map, self.ttl(domain), Origin::Snapshot));
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.entries.entry(domain) {
                slot.insert(entry);
                seeded += 1;
            }
        }
        info!(seeded, dir = %loader.dir().display(), "Seeded cache from snapshot");
        Ok(seeded)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            fetch_errors: c.fetch_errors.load(Ordering::Relaxed),
            stale_serves: c.stale_serves.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Formulas
    // ═══════════════════════════════════════════════════════════════════════

    /// Evaluate a named formula.
    ///
    /// `Ok(None)` when no such formula exists. A missing declared variable,
    /// a formula that failed to parse, or a non-finite result is an error.
    pub async fn evaluate(&self, name: &str, vars: &Bindings) -> Result<Option<f64>, ResolveError> {
        let result = match self.formula(name).await? {
            None => Ok(None),
            Some(formula) => formula.evaluate(vars).map(Some).map_err(ResolveError::from),
        };

        let outcome = match &result {
            Ok(Some(_)) => "ok",
            Ok(None) => "absent",
            Err(_) => "error",
        };
        crate::metrics::record_formula_evaluation(outcome);
        result
    }

    /// Compiled formula by name.
    pub async fn formula(&self, name: &str) -> Result<Option<Arc<CompiledFormula>>, ResolveError> {
        let entry = self.domain(ConfigDomain::Formulas).await?.value;
        let Some(table) = &entry.formulas else {
            return Ok(None);
        };
        match table.get(name) {
            None => Ok(None),
            Some(compiled) => Ok(Some(compiled?)),
        }
    }

    pub async fn formulas_in_category(&self, category: &str) -> Result<Vec<Arc<CompiledFormula>>, ResolveError> {
        let entry = self.domain(ConfigDomain::Formulas).await?.value;
        Ok(entry
            .formulas
            .as_ref()
            .map(|table| table.in_category(category))
            .unwrap_or_default())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Typed accessors
    // ═══════════════════════════════════════════════════════════════════════

    async fn typed<T: DeserializeOwned>(&self, domain: ConfigDomain, key: &str) -> Result<Option<T>, ResolveError> {
        let Some(value) = self.get(domain, key).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ResolveError::Malformed {
                domain,
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Numeric value of a named calculation constant.
    pub async fn calculation_value(&self, name: &str) -> Result<Option<f64>, ResolveError> {
        let Some(row) = self.get(ConfigDomain::Calculations, name).await? else {
            return Ok(None);
        };
        row.get("value")
            .and_then(Value::as_f64)
            .map(Some)
            .ok_or_else(|| ResolveError::Malformed {
                domain: ConfigDomain::Calculations,
                key: name.to_string(),
                message: "missing numeric 'value'".to_string(),
            })
    }

    /// Localized text for `key`. Never fails: a missing or unreadable entry
    /// yields the key itself, and missing English falls back to Norwegian.
    pub async fn text(&self, key: &str, language: Language) -> String {
        let row = match self.get(ConfigDomain::Content, key).await {
            Ok(Some(row)) => row,
            Ok(None) => return key.to_string(),
            Err(e) => {
                debug!(key, error = %e, "Content unavailable");
                return key.to_string();
            }
        };

        let pick = |field: &str| row.get(field).and_then(Value::as_str).filter(|s| !s.is_empty());
        let text = match language {
            Language::English => pick("english_text").or_else(|| pick("norwegian_text")),
            Language::Norwegian => pick("norwegian_text"),
        };
        text.map_or_else(|| key.to_string(), str::to_string)
    }

    /// Whether a feature flag is on. Missing flags and lookup failures are off.
    pub async fn is_feature_enabled(&self, name: &str) -> bool {
        match self.get(ConfigDomain::FeatureFlags, name).await {
            Ok(Some(row)) => row.get("enabled").and_then(Value::as_bool).unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                debug!(flag = name, error = %e, "Feature flags unavailable");
                false
            }
        }
    }

    /// Energy limit (kWh/m²·yr) for a building type.
    pub async fn tek_limit(&self, building_type: &str) -> Result<Option<f64>, ResolveError> {
        Ok(self
            .typed::<TekRequirement>(ConfigDomain::TekRequirements, building_type)
            .await?
            .map(|req| req.max_energy_kwh_m2))
    }

    /// Municipality by number; the code is normalized to four digits first.
    pub async fn municipality(&self, code: &str) -> Result<Option<Municipality>, ResolveError> {
        let code = normalize_municipality_code(code);
        self.typed(ConfigDomain::Municipalities, &code).await
    }

    /// Every heat source, ordered by priority (unprioritized last).
    pub async fn heat_sources(&self) -> Result<Vec<HeatSource>, ResolveError> {
        let map = self.domain_map(ConfigDomain::HeatSources).await?.value;
        let mut sources = Vec::with_capacity(map.len());
        for (key, row) in map.iter() {
            match serde_json::from_value::<HeatSource>(row.clone()) {
                Ok(source) => sources.push(source),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed heat source"),
            }
        }
        sources.sort_by_key(|s| (s.priority.unwrap_or(i64::MAX), s.name.clone()));
        Ok(sources)
    }
}

fn freshness_label(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::Fresh => "fresh",
        Freshness::Stale => "stale",
        Freshness::Snapshot => "snapshot",
        Freshness::Default => "default",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::bindings;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn store() -> Arc<InMemoryStore> {
        Arc::new(
            InMemoryStore::new()
                .with_rows(
                    ConfigDomain::Content,
                    vec![
                        json!({"key": "landing.title", "norwegian_text": "Spar energi", "english_text": "Save energy"}),
                        json!({"key": "nav.home", "norwegian_text": "Hjem"}),
                    ],
                )
                .with_rows(
                    ConfigDomain::FeatureFlags,
                    vec![
                        json!({"feature_name": "pdf_export", "enabled": false}),
                        json!({"feature_name": "map_visualization", "enabled": true}),
                    ],
                )
                .with_rows(
                    ConfigDomain::Formulas,
                    vec![json!({
                        "name": "annual_cost",
                        "formula": "annual_energy * total_price_per_kwh",
                        "variables": ["annual_energy", "total_price_per_kwh"],
                        "category": "energy"
                    })],
                ),
        )
    }

    fn cache(store: Arc<InMemoryStore>) -> ConfigCache {
        ConfigCache::with_ttl(store, Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_memoizes_within_ttl() {
        let s = store();
        let c = cache(s.clone());

        c.get(ConfigDomain::Content, "nav.home").await.unwrap();
        c.get(ConfigDomain::Content, "landing.title").await.unwrap();
        assert_eq!(s.fetch_count(ConfigDomain::Content), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        c.get(ConfigDomain::Content, "nav.home").await.unwrap();
        assert_eq!(s.fetch_count(ConfigDomain::Content), 2);
    }

    #[tokio::test]
    async fn test_unknown_key_is_none() {
        let c = cache(store());
        assert_eq!(c.get(ConfigDomain::Content, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_only_touches_one_domain() {
        let s = store();
        let c = cache(s.clone());
        c.get(ConfigDomain::Content, "nav.home").await.unwrap();
        c.get(ConfigDomain::FeatureFlags, "pdf_export").await.unwrap();

        c.invalidate(ConfigDomain::Content);
        c.get(ConfigDomain::Content, "nav.home").await.unwrap();
        c.get(ConfigDomain::FeatureFlags, "pdf_export").await.unwrap();

        assert_eq!(s.fetch_count(ConfigDomain::Content), 2);
        assert_eq!(s.fetch_count(ConfigDomain::FeatureFlags), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_served_when_refresh_fails() {
        let s = store();
        let c = cache(s.clone());
        c.get(ConfigDomain::Content, "nav.home").await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        s.set_unavailable(true);
        let served = c.get_served(ConfigDomain::Content, "nav.home").await.unwrap();

        assert_eq!(served.freshness, Freshness::Stale);
        assert_eq!(served.value.unwrap()["norwegian_text"], "Hjem");
        assert_eq!(c.stats().stale_serves, 1);
    }

    #[tokio::test]
    async fn test_cold_failure_without_defaults_surfaces() {
        let s = store();
        s.set_unavailable(true);
        let c = cache(s);

        let err = c.get(ConfigDomain::Content, "nav.home").await.unwrap_err();

        assert!(matches!(
            err,
            ResolveError::SourceUnavailable { domain: ConfigDomain::Content, .. }
        ));
    }

    #[tokio::test]
    async fn test_cold_failure_uses_defaults() {
        let s = store();
        s.set_unavailable(true);
        let c = cache(s);

        let served = c.get_served(ConfigDomain::TekRequirements, "Kontor").await.unwrap();

        assert_eq!(served.freshness, Freshness::Default);
        assert_eq!(served.value.unwrap()["max_energy_kwh_m2"], 115.0);
    }

    #[tokio::test]
    async fn test_recovers_after_default() {
        let s = store();
        s.set_unavailable(true);
        let c = cache(s.clone());
        c.get(ConfigDomain::TekRequirements, "Kontor").await.unwrap();

        s.set_unavailable(false);
        s.set_rows(
            ConfigDomain::TekRequirements,
            vec![json!({"building_type": "Kontor", "max_energy_kwh_m2": 110})],
        );

        let served = c.get_served(ConfigDomain::TekRequirements, "Kontor").await.unwrap();
        assert_eq!(served.freshness, Freshness::Fresh);
        assert_eq!(c.tek_limit("Kontor").await.unwrap(), Some(110.0));
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_fetch() {
        let s = store();
        s.set_latency(Some(Duration::from_millis(20)));
        let c = Arc::new(cache(s.clone()));

        let reads = (0..16).map(|_| {
            let c = c.clone();
            tokio::spawn(async move { c.get(ConfigDomain::Content, "nav.home").await })
        });
        for handle in futures::future::join_all(reads).await {
            assert!(handle.unwrap().unwrap().is_some());
        }

        assert_eq!(s.fetch_count(ConfigDomain::Content), 1);
    }

    #[tokio::test]
    async fn test_evaluate() {
        let c = cache(store());

        let cost = c
            .evaluate(
                "annual_cost",
                &bindings([("annual_energy", 20_000.0), ("total_price_per_kwh", 1.2)]),
            )
            .await
            .unwrap()
            .unwrap();
        assert!((cost - 24_000.0).abs() < 1e-9);

        assert_eq!(c.evaluate("nope", &Bindings::new()).await.unwrap(), None);

        let err = c
            .evaluate("annual_cost", &bindings([("annual_energy", 20_000.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Formula(FormulaError::InvalidBinding { .. })));
    }

    #[tokio::test]
    async fn test_text_fallbacks() {
        let c = cache(store());

        assert_eq!(c.text("landing.title", Language::English).await, "Save energy");
        assert_eq!(c.text("nav.home", Language::English).await, "Hjem");
        assert_eq!(c.text("missing.key", Language::Norwegian).await, "missing.key");
    }

    #[tokio::test]
    async fn test_feature_flags() {
        let c = cache(store());

        assert!(c.is_feature_enabled("map_visualization").await);
        assert!(!c.is_feature_enabled("pdf_export").await);
        assert!(!c.is_feature_enabled("unknown").await);
    }

    #[tokio::test]
    async fn test_heat_sources_sorted_by_priority() {
        let s = store();
        s.set_unavailable(true);
        let c = cache(s);

        let sources = c.heat_sources().await.unwrap();

        let names: Vec<_> = sources.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["heatpump_air_air", "heatpump_air_water", "ground_source", "district_heating", "electric"]
        );
    }

    #[tokio::test]
    async fn test_municipality_code_normalized() {
        let s = store();
        s.set_rows(
            ConfigDomain::Municipalities,
            vec![json!({"municipality_code": "0301", "municipality_name": "Oslo", "price_zone": "NO1"})],
        );
        let c = cache(s);

        let oslo = c.municipality("301").await.unwrap().unwrap();

        assert_eq!(oslo.name.as_deref(), Some("Oslo"));
    }

    #[tokio::test]
    async fn test_invalidation_listener() {
        let s = store();
        let c = Arc::new(cache(s.clone()));
        let handle = c.listen_to_store().unwrap();

        c.get(ConfigDomain::Content, "nav.home").await.unwrap();
        s.set_rows(
            ConfigDomain::Content,
            vec![json!({"key": "nav.home", "norwegian_text": "Forside"})],
        );

        // Give the listener a chance to run
        for _ in 0..50 {
            if c.stats().invalidations > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(c.text("nav.home", Language::Norwegian).await, "Forside");
        handle.abort();
    }
}
