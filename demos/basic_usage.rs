//! Basic usage of energy-resolver with an in-memory configuration store.
//!
//! Walks through the three parts without any external service:
//!
//! 1. Sync every domain to a snapshot directory and verify the manifest
//! 2. Read through the cache, evaluate formulas, run the energy chain
//! 3. Take the store down and watch the cache fall back
//! 4. Resolve a building profile against stub sources (one of them slow)
//!
//! Run with:
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use energy_resolver::aggregate::{
    Certificate, CertificateSource, Footprint, FootprintSource, PriceRecord, PricingSource, SourceError,
};
use energy_resolver::formula::bindings;
use energy_resolver::snapshot::Integrity;
use energy_resolver::{
    Aggregator, BranchTimeouts, BuildingInputs, BuildingQuery, ConfigCache, ConfigDomain, EnergyCalculator,
    InMemoryStore, Language, PriceZone, ResolverConfig, SnapshotBuilder, SnapshotLoader,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

struct Register;

#[async_trait]
impl CertificateSource for Register {
    async fn find(&self, gnr: u32, bnr: u32, _: Option<&str>) -> Result<Option<Certificate>, SourceError> {
        // Pretend the register is slow today
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(serde_json::from_value(json!({"gnr": gnr, "bnr": bnr, "energy_class": "C"})).ok())
    }
}

struct Prices;

#[async_trait]
impl PricingSource for Prices {
    async fn recent_prices(&self, _: PriceZone, limit: usize) -> Result<Vec<PriceRecord>, SourceError> {
        Ok((0..limit)
            .map(|i| PriceRecord {
                year: 2025,
                week_number: 42 - i as u32,
                week: None,
                spot_price_ore_kwh: 80.0 + i as f64,
            })
            .collect())
    }
}

struct Map;

#[async_trait]
impl FootprintSource for Map {
    async fn nearby(&self, lat: f64, lon: f64, _: u32) -> Result<Vec<Footprint>, SourceError> {
        Ok(vec![Footprint {
            id: "osm-1".into(),
            building_type: "Kontor".into(),
            coordinates: vec![[lat, lon], [lat + 0.0001, lon], [lat + 0.0001, lon + 0.0002], [lat, lon]],
            area_m2: Some(122.0),
            levels: Some(5),
            height_m: None,
            name: None,
            address: Some("Karl Johans gate 1".into()),
            building_number: None,
            address_label: Some("KJG1".into()),
        }])
    }
}

/// Formulas, TEK limits and heat sources are left out: the cache serves its
/// compiled-in defaults for those.
fn store() -> InMemoryStore {
    InMemoryStore::new()
        .with_rows(
            ConfigDomain::Calculations,
            vec![
                json!({"name": "base_electricity_price", "value": 2.0, "unit": "kr/kWh"}),
                json!({"name": "grid_rent", "value": 0.4, "unit": "kr/kWh"}),
            ],
        )
        .with_rows(
            ConfigDomain::Content,
            vec![json!({"key": "report.title", "norwegian_text": "Energirapport", "english_text": "Energy report"})],
        )
        .with_rows(ConfigDomain::FeatureFlags, vec![json!({"feature_name": "pdf_export", "enabled": true})])
        .with_rows(
            ConfigDomain::Municipalities,
            vec![json!({"municipality_code": "0301", "municipality_name": "Oslo", "price_zone": "NO1"})],
        )
}

fn print_metrics(snapshotter: &Snapshotter) {
    let mut counters: Vec<(String, u64)> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(n) => Some((key.key().name().to_string(), n)),
            _ => None,
        })
        .collect();
    counters.sort();
    counters.dedup_by(|a, b| {
        if a.0 == b.0 {
            b.1 += a.1;
            true
        } else {
            false
        }
    });
    for (name, total) in counters {
        println!("   └─ {name}: {total}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt().with_target(false).compact().init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           energy-resolver: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Snapshot every domain
    // ─────────────────────────────────────────────────────────────────────────
    let store = Arc::new(store());
    let dir = tempfile::tempdir()?;

    println!("📦 Syncing snapshots to {}", dir.path().display());
    let report = SnapshotBuilder::new(store.clone(), dir.path(), "demo").sync_all().await?;
    println!("   Status: {}", report.status().as_str());
    for (domain, items) in &report.manifest.items {
        println!("   └─ {domain}: {items} items");
    }
    if !report.manifest.sync_metadata.notices.is_empty() {
        println!("   Notices: {:?}", report.manifest.sync_metadata.notices);
    }

    let loader = SnapshotLoader::new(dir.path());
    let all_valid = loader.verify().await?.iter().all(|d| d.integrity == Integrity::Valid);
    println!("   Checksums valid: {all_valid}");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Read-through cache and formulas
    // ─────────────────────────────────────────────────────────────────────────
    let config = ResolverConfig::default();
    let cache = Arc::new(ConfigCache::new(store.clone(), &config));

    println!("\n🧮 Formulas");
    let cost = cache
        .evaluate("annual_cost", &bindings([("annual_energy", 10_000.0), ("total_price_per_kwh", 2.4)]))
        .await?;
    println!("   └─ annual_cost(10 000 kWh @ 2.4) = {cost:?}");
    println!("   └─ unknown formula = {:?}", cache.evaluate("nope", &bindings([])).await?);

    println!("\n📖 Typed lookups");
    println!("   └─ title (en): {}", cache.text("report.title", Language::English).await);
    println!("   └─ pdf_export enabled: {}", cache.is_feature_enabled("pdf_export").await);
    println!("   └─ TEK17 limit for Kontor: {:?}", cache.tek_limit("Kontor").await?);

    let figures = EnergyCalculator::new(cache.clone())
        .calculate(&BuildingInputs {
            bra: 1_000.0,
            building_type: "Kontor".into(),
            energy_per_m2: Some(180.0),
        })
        .await?;
    println!("\n⚡ Energy chain for a 1 000 m² office");
    println!("   └─ annual energy: {:.0} kWh", figures.annual_energy);
    println!("   └─ annual cost:   {:.0} kr", figures.annual_cost);
    println!("   └─ investment room: {:.0} kr", figures.investment_room);
    println!("   └─ fallbacks: {:?}", figures.fallbacks_used);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Store outage
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔌 Taking the store down and invalidating calculations");
    store.set_unavailable(true);
    cache.invalidate(ConfigDomain::Calculations);
    let served = cache.domain_map(ConfigDomain::Calculations).await?;
    println!("   └─ calculations served as {:?} ({} entries)", served.freshness, served.value.len());
    store.set_unavailable(false);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Building profile
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🏢 Resolving building profile (certificate source is slow)");
    let aggregator = Aggregator::new(cache.clone(), Arc::new(Register), Arc::new(Prices), Arc::new(Map), &config)
        .with_timeouts(BranchTimeouts::uniform(Duration::from_millis(100)));
    let query = BuildingQuery::new("Karl Johans gate 1, Oslo", 59.9127, 10.7461)
        .with_municipality("301")
        .with_parcel(208, 1);

    let profile = aggregator.resolve_building_profile(&query).await;
    println!("{}", serde_json::to_string_pretty(&profile)?);

    println!("\n📊 Cache stats: {:?}", cache.stats());
    println!("📊 Metrics:");
    print_metrics(&snapshotter);

    println!("\n✅ Done");
    Ok(())
}
