//! # Energy Resolver
//!
//! Configuration and building-data resolution core for energy analysis.
//!
//! ## Architecture
//!
//! Three parts share one configuration cache:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Remote configuration store (Postgres)         │
//! │  • One table per domain (formulas, TEK limits, ...)         │
//! │  • NOTIFY on change                                         │
//! └─────────────────────────────────────────────────────────────┘
//!          │ sync_all()                         │ fetch / notify
//!          ▼                                    ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │    Snapshot Builder      │   │   Read-Through Config Cache  │
//! │  • Domain JSON files     │──▶│  • Per-domain TTL            │
//! │  • SHA-256 manifest      │   │  • Stale → snapshot →        │
//! │  • Atomic writes         │   │    hardcoded fallback        │
//! └──────────────────────────┘   │  • Safe formula evaluation   │
//!                                └──────────────────────────────┘
//!                                               │ zones, limits
//!                                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Multi-Source Aggregator                    │
//! │  • zone ∥ certificate ∥ pricing ∥ footprint                 │
//! │  • Per-branch timeout, circuit breaker, TTL cache           │
//! │  • Partial results, never a total failure                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use energy_resolver::{ConfigCache, ResolverConfig, SnapshotLoader};
//! use energy_resolver::formula::bindings;
//! use energy_resolver::store::PgStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ResolverConfig::from_env();
//!     let store = Arc::new(PgStore::connect(config.database_url.as_deref().unwrap_or_default()).await?);
//!     let cache = Arc::new(ConfigCache::new(store, &config));
//!
//!     // Survive a cold start with the store down
//!     cache.seed_from_snapshot(&SnapshotLoader::new(&config.snapshot_dir)).await?;
//!     let _listener = cache.listen_to_store();
//!
//!     let cost = cache
//!         .evaluate("annual_cost", &bindings([("annual_energy", 10_000.0), ("total_price_per_kwh", 2.4)]))
//!         .await?;
//!     println!("annual cost: {cost:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`snapshot`]: [`SnapshotBuilder`] (`sync_all`), manifest, verified loader
//! - [`cache`]: [`ConfigCache`] read-through cache and typed accessors
//! - [`formula`]: formula parser, evaluator and the energy calculation chain
//! - [`aggregate`]: [`Aggregator`] (`resolve_building_profile`) and its sources
//! - [`store`]: remote store seam, Postgres and in-memory backends
//! - [`resilience`]: retry with backoff, per-source circuit breakers
//! - [`domain`]: configuration domains and record types
//! - [`config`]: [`ResolverConfig`]

pub mod config;
pub mod domain;
pub mod store;
pub mod snapshot;
pub mod cache;
pub mod formula;
pub mod aggregate;
pub mod resilience;
pub mod metrics;

pub use config::ResolverConfig;
pub use domain::{ConfigDomain, DomainMap, PriceZone};
pub use store::{ChangeEvent, InMemoryStore, PgStore, RemoteStore, StoreError};
pub use snapshot::{SnapshotBuilder, SnapshotError, SnapshotLoader, SyncReport, SyncStatus, Manifest};
pub use cache::{ConfigCache, Freshness, Language, ResolveError, Served};
pub use formula::{Bindings, CompiledFormula, FormulaError};
pub use formula::calc::{BuildingInputs, EnergyCalculator, EnergyFigures};
pub use aggregate::{AggregateResult, Aggregator, BranchTimeouts, BuildingQuery, SourceKind, SourceResult};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, SourceCircuits};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
