//! Chaos Testing for Energy Resolver
//!
//! This module tests failure scenarios using:
//! 1. **FailingStore wrapper** - precise error injection at specific call counts
//! 2. **Outages and latency** - the in-memory store taken down or slowed mid-run
//! 3. **Data corruption** - snapshot files edited or truncated behind the manifest
//! 4. **Dead sources** - aggregator sources that always fail or never answer
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use energy_resolver::aggregate::{
    Certificate, CertificateSource, Footprint, FootprintSource, PriceRecord, PricingSource, SourceError,
};
use energy_resolver::snapshot::{Integrity, MANIFEST_FILE};
use energy_resolver::{
    Aggregator, BranchTimeouts, BuildingQuery, ChangeEvent, CircuitConfig, ConfigCache, ConfigDomain, Freshness,
    InMemoryStore, PriceZone, RemoteStore, ResolverConfig, RetryConfig, SnapshotBuilder, SnapshotLoader,
    SourceCircuits, SourceKind, StoreError, SyncStatus,
};

// =============================================================================
// Failing Store Wrapper - Precise Error Injection
// =============================================================================

/// Wraps a store and fails chosen fetches, counted across all domains.
pub struct FailingStore<S: RemoteStore> {
    inner: S,
    call_count: AtomicU64,
    /// Fail on these call numbers (1-indexed)
    fail_on_calls: Vec<u64>,
    /// Fail every call from `fail_on_calls[0]` onwards
    fail_permanently: AtomicBool,
}

impl<S: RemoteStore> FailingStore<S> {
    pub fn new(inner: S, fail_on_calls: Vec<u64>) -> Self {
        Self {
            inner,
            call_count: AtomicU64::new(0),
            fail_on_calls,
            fail_permanently: AtomicBool::new(false),
        }
    }

    /// Fails every call after the first `n`
    pub fn fail_after(inner: S, n: u64) -> Self {
        let store = Self::new(inner, vec![n + 1]);
        store.fail_permanently.store(true, Ordering::SeqCst);
        store
    }

    pub fn calls(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fail_on_calls.first() {
            Some(&first) if self.fail_permanently.load(Ordering::SeqCst) => count >= first,
            _ => self.fail_on_calls.contains(&count),
        }
    }
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for FailingStore<S> {
    async fn fetch_rows(&self, domain: ConfigDomain) -> Result<Vec<Value>, StoreError> {
        if self.should_fail() {
            return Err(StoreError::Unavailable(format!("injected failure on {domain}")));
        }
        self.inner.fetch_rows(domain).await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        self.inner.subscribe()
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn full_store() -> InMemoryStore {
    InMemoryStore::new()
        .with_rows(
            ConfigDomain::Calculations,
            vec![json!({"name": "grid_rent", "value": 0.45, "unit": "kr/kWh"})],
        )
        .with_rows(
            ConfigDomain::Content,
            vec![json!({"key": "report.title", "norwegian_text": "Energirapport"})],
        )
        .with_rows(
            ConfigDomain::FeatureFlags,
            vec![json!({"feature_name": "pdf_export", "enabled": true})],
        )
        .with_rows(
            ConfigDomain::Formulas,
            vec![json!({
                "name": "annual_cost",
                "formula": "annual_energy * total_price_per_kwh",
                "variables": ["annual_energy", "total_price_per_kwh"]
            })],
        )
        .with_rows(
            ConfigDomain::TekRequirements,
            vec![json!({"building_type": "Kontor", "max_energy_kwh_m2": 110})],
        )
        .with_rows(
            ConfigDomain::HeatSources,
            vec![json!({"name": "district_heating", "priority": 2})],
        )
        .with_rows(
            ConfigDomain::Municipalities,
            vec![json!({"municipality_code": "5001", "municipality_name": "Trondheim", "price_zone": "NO3"})],
        )
}

const TTL: Duration = Duration::from_secs(60);

/// Register that is down for every request
#[derive(Default)]
struct DeadRegister {
    calls: AtomicUsize,
}

#[async_trait]
impl CertificateSource for DeadRegister {
    async fn find(&self, _: u32, _: u32, _: Option<&str>) -> Result<Option<Certificate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SourceError::Http {
            status: 503,
            message: "service unavailable".into(),
        })
    }
}

/// Register that accepts the request and never answers
#[derive(Default)]
struct HangingRegister {
    calls: AtomicUsize,
}

#[async_trait]
impl CertificateSource for HangingRegister {
    async fn find(&self, _: u32, _: u32, _: Option<&str>) -> Result<Option<Certificate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }
}

struct EmptyRegister;

#[async_trait]
impl CertificateSource for EmptyRegister {
    async fn find(&self, _: u32, _: u32, _: Option<&str>) -> Result<Option<Certificate>, SourceError> {
        Ok(None)
    }
}

struct FlatPrices;

#[async_trait]
impl PricingSource for FlatPrices {
    async fn recent_prices(&self, _: PriceZone, limit: usize) -> Result<Vec<PriceRecord>, SourceError> {
        Ok((0..limit)
            .map(|i| PriceRecord {
                year: 2025,
                week_number: 40 - (i as u32 % 40),
                week: None,
                spot_price_ore_kwh: 45.0,
            })
            .collect())
    }
}

struct NoBuildings;

#[async_trait]
impl FootprintSource for NoBuildings {
    async fn nearby(&self, _: f64, _: f64, _: u32) -> Result<Vec<Footprint>, SourceError> {
        Ok(Vec::new())
    }
}

fn trondheim() -> BuildingQuery {
    BuildingQuery::new("Munkegata 1", 63.4305, 10.3951)
        .with_municipality("5001")
        .with_parcel(400, 12)
}

// =============================================================================
// Cache Under Store Failure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_stale_served_then_recovers() {
    // Call 1 loads, call 2 (first refresh) fails, call 3 succeeds
    let store = Arc::new(FailingStore::new(full_store(), vec![2]));
    let cache = ConfigCache::with_ttl(store.clone(), TTL);

    let first = cache.get_served(ConfigDomain::TekRequirements, "Kontor").await.unwrap();
    assert_eq!(first.freshness, Freshness::Fresh);

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    let stale = cache.get_served(ConfigDomain::TekRequirements, "Kontor").await.unwrap();
    assert_eq!(stale.freshness, Freshness::Stale);
    assert_eq!(stale.value.unwrap()["max_energy_kwh_m2"], 110);

    // A stale entry is not memoized as fresh: the next read retries
    let recovered = cache.get_served(ConfigDomain::TekRequirements, "Kontor").await.unwrap();
    assert_eq!(recovered.freshness, Freshness::Fresh);
    assert_eq!(store.calls(), 3);
    assert_eq!(cache.stats().stale_serves, 1);
}

#[tokio::test]
async fn chaos_invalidated_domain_falls_back_to_last_copy() {
    let store = Arc::new(full_store());
    let cache = ConfigCache::with_ttl(store.clone(), TTL);
    assert_eq!(cache.calculation_value("grid_rent").await.unwrap(), Some(0.45));

    store.set_unavailable(true);
    cache.invalidate(ConfigDomain::Calculations);

    let served = cache.domain_map(ConfigDomain::Calculations).await.unwrap();
    assert_eq!(served.freshness, Freshness::Stale);
    assert_eq!(cache.calculation_value("grid_rent").await.unwrap(), Some(0.45));
    assert!(store.fetch_count(ConfigDomain::Calculations) >= 2);
}

#[tokio::test]
async fn chaos_cold_start_defaults_replaced_once_store_returns() {
    let store = Arc::new(full_store());
    store.set_unavailable(true);
    let cache = ConfigCache::with_ttl(store.clone(), TTL);

    assert_eq!(cache.tek_limit("Kontor").await.unwrap(), Some(115.0));
    // No default exists for content or municipalities
    assert!(cache.get(ConfigDomain::Municipalities, "5001").await.is_err());
    assert_eq!(cache.text("report.title", Default::default()).await, "report.title");

    store.set_unavailable(false);
    let served = cache.get_served(ConfigDomain::TekRequirements, "Kontor").await.unwrap();
    assert_eq!(served.freshness, Freshness::Fresh);
    assert_eq!(cache.tek_limit("Kontor").await.unwrap(), Some(110.0));
}

#[tokio::test(start_paused = true)]
async fn chaos_concurrent_readers_share_one_refresh() {
    let store = Arc::new(full_store());
    store.set_latency(Some(Duration::from_millis(250)));
    let cache = Arc::new(ConfigCache::with_ttl(store.clone(), TTL));

    let readers = (0..16).map(|_| {
        let cache = cache.clone();
        async move { cache.get(ConfigDomain::FeatureFlags, "pdf_export").await }
    });
    let results = join_all(readers).await;

    assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));
    assert_eq!(store.fetch_count(ConfigDomain::FeatureFlags), 1);
}

#[tokio::test]
async fn chaos_lagged_notifications_invalidate_everything() {
    let store = Arc::new(full_store());
    let cache = Arc::new(ConfigCache::with_ttl(store.clone(), TTL));
    cache.get(ConfigDomain::Content, "report.title").await.unwrap();
    let _listener = cache.listen_to_store().unwrap();

    // Overflow the channel before the listener gets to run
    for _ in 0..100 {
        store.notify(ChangeEvent::Domain(ConfigDomain::FeatureFlags));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    cache.get(ConfigDomain::Content, "report.title").await.unwrap();
    assert_eq!(store.fetch_count(ConfigDomain::Content), 2);
}

// =============================================================================
// Snapshot Corruption and Failing Syncs
// =============================================================================

#[tokio::test]
async fn chaos_tampered_snapshot_is_skipped_on_seed() {
    let dir = tempfile::tempdir().unwrap();
    SnapshotBuilder::new(Arc::new(full_store()), dir.path(), "test")
        .sync_all()
        .await
        .unwrap();

    // Valid JSON with different content, and a truncated file
    tokio::fs::write(
        dir.path().join(ConfigDomain::Formulas.snapshot_file()),
        br#"{"annual_cost":{"name":"annual_cost","formula":"annual_energy * 1000","variables":["annual_energy"]}}"#,
    )
    .await
    .unwrap();
    tokio::fs::write(dir.path().join(ConfigDomain::Content.snapshot_file()), b"{\"report.ti")
        .await
        .unwrap();

    let loader = SnapshotLoader::new(dir.path());
    let report = loader.verify().await.unwrap();
    let integrity_of = |domain: ConfigDomain| {
        report
            .iter()
            .find(|d| d.domain == domain)
            .map(|d| d.integrity.clone())
            .unwrap()
    };
    assert!(matches!(integrity_of(ConfigDomain::Formulas), Integrity::Mismatch { .. }));
    assert!(matches!(integrity_of(ConfigDomain::Content), Integrity::Unreadable(_)));
    assert_eq!(integrity_of(ConfigDomain::Calculations), Integrity::Valid);

    let offline = Arc::new(InMemoryStore::new());
    offline.set_unavailable(true);
    let cache = ConfigCache::with_ttl(offline, TTL);
    assert_eq!(cache.seed_from_snapshot(&loader).await.unwrap(), ConfigDomain::ALL.len() - 2);

    // Tampered formulas never reach evaluation; the default chain is used
    let served = cache.domain_map(ConfigDomain::Formulas).await.unwrap();
    assert_eq!(served.freshness, Freshness::Default);
}

#[tokio::test]
async fn chaos_missing_snapshot_file_reported() {
    let dir = tempfile::tempdir().unwrap();
    SnapshotBuilder::new(Arc::new(full_store()), dir.path(), "test")
        .sync_all()
        .await
        .unwrap();
    tokio::fs::remove_file(dir.path().join(ConfigDomain::HeatSources.snapshot_file()))
        .await
        .unwrap();

    let report = SnapshotLoader::new(dir.path()).verify().await.unwrap();

    assert!(report
        .iter()
        .any(|d| d.domain == ConfigDomain::HeatSources && d.integrity == Integrity::Missing));
}

#[tokio::test]
async fn chaos_transient_failures_absorbed_by_retry() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FailingStore::new(full_store(), vec![1, 2, 3]));

    let report = SnapshotBuilder::new(store.clone(), dir.path(), "test")
        .with_retry(RetryConfig::test())
        .sync_all()
        .await
        .unwrap();

    assert_eq!(report.status(), SyncStatus::Success);
    assert_eq!(store.calls(), ConfigDomain::ALL.len() as u64 + 3);
}

#[tokio::test]
async fn chaos_every_domain_failing_still_writes_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FailingStore::fail_after(full_store(), 0));

    let report = SnapshotBuilder::new(store, dir.path(), "test")
        .with_retry(RetryConfig::test())
        .sync_all()
        .await
        .unwrap();

    assert_eq!(report.status(), SyncStatus::Failed);
    assert!(report.manifest.checksums.is_empty());
    assert!(dir.path().join(MANIFEST_FILE).exists());

    let persisted = SnapshotLoader::new(dir.path()).load_manifest().await.unwrap();
    assert_eq!(persisted.sync_status, SyncStatus::Failed);
    assert_eq!(persisted.sync_metadata.errors.len(), ConfigDomain::ALL.len());
}

#[tokio::test]
async fn chaos_missing_optional_table_keeps_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(full_store());
    let builder = SnapshotBuilder::new(store.clone(), dir.path(), "test");
    let first = builder.sync_all().await.unwrap();

    store.drop_table(ConfigDomain::HeatSources);
    let second = builder.sync_all().await.unwrap();

    assert_eq!(second.status(), SyncStatus::Success);
    assert_eq!(second.manifest.items["heat_sources"], 1);
    assert_eq!(
        second.manifest.checksum_for("heat_sources"),
        first.manifest.checksum_for("heat_sources")
    );
    assert_eq!(second.manifest.sync_metadata.notices.len(), 1);
}

// =============================================================================
// Aggregator Source Failures
// =============================================================================

#[tokio::test]
async fn chaos_dead_certificate_source_trips_circuit() {
    let cache = Arc::new(ConfigCache::with_ttl(Arc::new(full_store()), TTL));
    let register = Arc::new(DeadRegister::default());
    let agg = Aggregator::new(
        cache,
        register.clone(),
        Arc::new(FlatPrices),
        Arc::new(NoBuildings),
        &ResolverConfig::default(),
    )
    .with_circuits(SourceCircuits::with_config(CircuitConfig::test()));

    let mut last = None;
    for _ in 0..6 {
        last = Some(agg.resolve_building_profile(&trondheim()).await);
    }
    let last = last.unwrap();

    assert!(last.failed(SourceKind::Certificate));
    assert!(last.certificate.error().unwrap().contains("circuit open"));
    assert!(agg.circuits().certificate.rejections() > 0);
    assert!(register.calls.load(Ordering::SeqCst) < 6);
    // Other branches unaffected
    assert!(last.zone.is_ok());
    assert!(last.pricing.is_ok());
    assert_eq!(last.footprint.value(), Some(&None));
}

#[tokio::test(start_paused = true)]
async fn chaos_hanging_certificate_source_trips_circuit() {
    let cache = Arc::new(ConfigCache::with_ttl(Arc::new(full_store()), TTL));
    let register = Arc::new(HangingRegister::default());
    let agg = Aggregator::new(
        cache,
        register.clone(),
        Arc::new(FlatPrices),
        Arc::new(NoBuildings),
        &ResolverConfig::default(),
    )
    .with_circuits(SourceCircuits::with_config(CircuitConfig::test()))
    .with_timeouts(BranchTimeouts::uniform(Duration::from_millis(50)));

    let mut last = None;
    for _ in 0..6 {
        last = Some(agg.resolve_building_profile(&trondheim()).await);
    }
    let last = last.unwrap();

    let breaker = &agg.circuits().certificate;
    assert!(breaker.failures() >= 2);
    assert!(breaker.rejections() > 0);
    assert!(register.calls.load(Ordering::SeqCst) < 6);
    assert!(last.certificate.error().unwrap().contains("circuit open"));
    assert!(last.pricing.is_ok());
}

#[tokio::test(start_paused = true)]
async fn chaos_slow_store_times_out_zone_and_pricing() {
    let store = Arc::new(full_store());
    store.set_latency(Some(Duration::from_secs(5)));
    let cache = Arc::new(ConfigCache::with_ttl(store, TTL));
    let agg = Aggregator::new(
        cache,
        Arc::new(EmptyRegister),
        Arc::new(FlatPrices),
        Arc::new(NoBuildings),
        &ResolverConfig::default(),
    )
    .with_timeouts(BranchTimeouts::uniform(Duration::from_secs(1)));

    let profile = agg.resolve_building_profile(&trondheim()).await;

    assert!(profile.zone.error().unwrap().contains("timed out"));
    assert!(profile.pricing.error().unwrap().contains("timed out"));
    assert!(profile.certificate.is_ok());
    assert!(profile.footprint.is_ok());
    assert_eq!(profile.errors.len(), 2);
}

#[tokio::test]
async fn chaos_store_outage_without_history_fails_zone_only_paths() {
    let store = Arc::new(full_store());
    store.set_unavailable(true);
    let cache = Arc::new(ConfigCache::with_ttl(store, TTL));
    let agg = Aggregator::new(
        cache,
        Arc::new(EmptyRegister),
        Arc::new(FlatPrices),
        Arc::new(NoBuildings),
        &ResolverConfig::default(),
    );

    let profile = agg.resolve_building_profile(&trondheim()).await;

    // Municipalities have no compiled-in default
    assert!(profile.failed(SourceKind::Zone));
    assert!(profile.failed(SourceKind::Pricing));
    assert!(!profile.failed(SourceKind::Certificate));
    assert!(profile.zone.error().unwrap().contains("unavailable"));
}
