// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Multi-Source Aggregator
//!
//! Resolves one building into a single profile by querying four sources
//! at once. Every branch has its own timeout and its own failure; a slow or
//! dead source never takes the others down.
//!
//! ```text
//!                    BuildingQuery
//!                         │
//!      ┌──────────────┬───┴──────────┬───────────────┐
//!      ▼              ▼              ▼               ▼
//!   zone ──────▶ pricing        certificate      footprint
//!  (config       (zone from     (gnr/bnr,        (Overpass,
//!   cache)        shared cell)   building nr)     closest)
//!      │              │              │               │
//!      └──────────────┴──────┬───────┴───────────────┘
//!                            ▼
//!                     AggregateResult
//!             { four SourceResults, hasErrors, errors }
//! ```
//!
//! Zone, certificate and pricing results are cached per source with their
//! own TTLs. Footprints are always fetched.

pub mod footprint;
pub mod http;
pub mod source_cache;
pub mod sources;
pub mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::cache::ConfigCache;
use crate::config::ResolverConfig;
use crate::domain::{normalize_municipality_code, PriceZone};
use crate::metrics::{record_profile_resolution, record_source_call, LatencyTimer};
use crate::resilience::circuit_breaker::{CircuitBreaker, SourceCircuits};

pub use http::{HttpCertificateSource, HttpPricingSource, OverpassFootprintSource};
pub use source_cache::{SourceCache, SourceCacheStats};
pub use sources::{CertificateSource, FootprintSource, PricingSource};
pub use types::{
    AggregateResult, BranchError, BuildingQuery, Certificate, CertificateLookup, EnergyGrade, Footprint,
    FootprintMatch, PricePoint, PriceRecord, PriceSummary, SourceError, SourceKind, SourceResult, ZoneInfo,
    ZoneLookup,
};

/// Records fetched for the rolling averages.
pub const PRICE_HISTORY_LEN: usize = 36;

/// Per-branch time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTimeouts {
    pub zone: Duration,
    pub certificate: Duration,
    pub pricing: Duration,
    pub footprint: Duration,
}

impl BranchTimeouts {
    #[must_use]
    pub fn uniform(limit: Duration) -> Self {
        Self {
            zone: limit,
            certificate: limit,
            pricing: limit,
            footprint: limit,
        }
    }

    /// Upper bound on a whole resolution.
    #[must_use]
    pub fn slowest(&self) -> Duration {
        self.zone.max(self.certificate).max(self.pricing).max(self.footprint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CertificateKey {
    gnr: u32,
    bnr: u32,
}

type ZoneOutcome = Result<(ZoneLookup, bool), SourceError>;

/// Per-source caches with their statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorStats {
    pub zone: SourceCacheStats,
    pub certificate: SourceCacheStats,
    pub current_price: SourceCacheStats,
    pub price_history: SourceCacheStats,
}

pub struct Aggregator {
    cache: Arc<ConfigCache>,
    certificates: Arc<dyn CertificateSource>,
    pricing: Arc<dyn PricingSource>,
    footprints: Arc<dyn FootprintSource>,
    circuits: SourceCircuits,
    timeouts: BranchTimeouts,
    footprint_radius_m: u32,
    zone_cache: SourceCache<String, ZoneLookup>,
    certificate_cache: SourceCache<(CertificateKey, Option<String>), Option<Certificate>>,
    current_price_cache: SourceCache<PriceZone, PriceRecord>,
    history_cache: SourceCache<PriceZone, Arc<Vec<PriceRecord>>>,
}

impl Aggregator {
    pub fn new(
        cache: Arc<ConfigCache>,
        certificates: Arc<dyn CertificateSource>,
        pricing: Arc<dyn PricingSource>,
        footprints: Arc<dyn FootprintSource>,
        config: &ResolverConfig,
    ) -> Self {
        let max = config.source_cache_max_entries;
        Self {
            cache,
            certificates,
            pricing,
            footprints,
            circuits: SourceCircuits::new(),
            timeouts: BranchTimeouts::uniform(config.branch_timeout()),
            footprint_radius_m: config.footprint_radius_m,
            zone_cache: SourceCache::new("zone", config.zone_ttl(), max),
            certificate_cache: SourceCache::new("certificate", config.certificate_ttl(), max),
            current_price_cache: SourceCache::new("price_current", config.price_current_ttl(), max),
            history_cache: SourceCache::new("price_history", config.price_history_ttl(), max),
        }
    }

    /// Aggregator over the HTTP sources named in `config`.
    pub fn from_config(cache: Arc<ConfigCache>, config: &ResolverConfig) -> Result<Self, SourceError> {
        Ok(Self::new(
            cache,
            Arc::new(HttpCertificateSource::from_config(config)?),
            Arc::new(HttpPricingSource::from_config(config)?),
            Arc::new(OverpassFootprintSource::from_config(config)?),
            config,
        ))
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: BranchTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_circuits(mut self, circuits: SourceCircuits) -> Self {
        self.circuits = circuits;
        self
    }

    #[must_use]
    pub fn timeouts(&self) -> BranchTimeouts {
        self.timeouts
    }

    #[must_use]
    pub fn circuits(&self) -> &SourceCircuits {
        &self.circuits
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            zone: self.zone_cache.stats(),
            certificate: self.certificate_cache.stats(),
            current_price: self.current_price_cache.stats(),
            price_history: self.history_cache.stats(),
        }
    }

    /// Drop every cached source result.
    pub fn clear_caches(&self) {
        self.zone_cache.clear();
        self.certificate_cache.clear();
        self.current_price_cache.clear();
        self.history_cache.clear();
    }

    /// Query all sources concurrently and merge the outcomes.
    ///
    /// Never fails as a whole: each branch reports its own error. Total time
    /// is bounded by [`BranchTimeouts::slowest`].
    #[instrument(skip(self, query), fields(address = %query.address))]
    pub async fn resolve_building_profile(&self, query: &BuildingQuery) -> AggregateResult {
        let start = Instant::now();
        let zone_cell: OnceCell<ZoneOutcome> = OnceCell::new();
        let t = self.timeouts;

        let (zone, certificate, pricing, footprint) = tokio::join!(
            self.branch(SourceKind::Zone, t.zone, start, self.shared_zone(&zone_cell, query)),
            self.branch(
                SourceKind::Certificate,
                t.certificate,
                start,
                self.resolve_certificate(query, start + t.certificate),
            ),
            self.branch(
                SourceKind::Pricing,
                t.pricing,
                start,
                self.resolve_pricing(&zone_cell, query, start + t.pricing),
            ),
            self.branch(
                SourceKind::Footprint,
                t.footprint,
                start,
                self.resolve_footprint(query, start + t.footprint),
            ),
        );

        let result = AggregateResult::new(zone, certificate, pricing, footprint);
        record_profile_resolution(result.has_errors, start.elapsed());
        debug!(
            has_errors = result.has_errors,
            errors = result.errors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Building profile resolved"
        );
        result
    }

    async fn branch<T, F>(&self, kind: SourceKind, limit: Duration, start: Instant, work: F) -> SourceResult<T>
    where
        F: Future<Output = Result<(T, bool), SourceError>>,
    {
        let _timer = LatencyTimer::new(kind.as_str());

        match tokio::time::timeout_at(start + limit, work).await {
            Ok(Ok((value, served_from_cache))) => {
                record_source_call(kind.as_str(), if served_from_cache { "cached" } else { "success" });
                SourceResult::Resolved {
                    value,
                    served_from_cache,
                }
            }
            Ok(Err(e)) => {
                warn!(source = %kind, error = %e, "Source lookup failed");
                let status = if matches!(e, SourceError::Timeout(_)) { "timeout" } else { "error" };
                record_source_call(kind.as_str(), status);
                SourceResult::Failed { error: e.to_string() }
            }
            Err(_) => {
                warn!(source = %kind, timeout_ms = limit.as_millis() as u64, "Source lookup timed out");
                record_source_call(kind.as_str(), "timeout");
                SourceResult::Failed {
                    error: SourceError::Timeout(limit).to_string(),
                }
            }
        }
    }

    /// One remote call through `breaker`, cut off at the branch deadline.
    ///
    /// The deadline is applied inside the breaker so a hanging source is
    /// recorded as a failure and can trip the circuit. It shares its instant
    /// with the branch timeout, which polls this future first and so sees the
    /// `Timeout` error rather than cancelling the call.
    async fn guarded<T, Fut>(
        breaker: &CircuitBreaker,
        deadline: Instant,
        limit: Duration,
        call: impl FnOnce() -> Fut,
    ) -> Result<T, SourceError>
    where
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let bounded = || async move {
            tokio::time::timeout_at(deadline, call())
                .await
                .unwrap_or_else(|_| Err(SourceError::Timeout(limit)))
        };
        breaker.call(bounded).await.map_err(SourceError::from)
    }

    /// One zone resolution per query, shared by the zone and pricing branches.
    async fn shared_zone(&self, cell: &OnceCell<ZoneOutcome>, query: &BuildingQuery) -> ZoneOutcome {
        cell.get_or_init(|| self.resolve_zone(query)).await.clone()
    }

    async fn resolve_zone(&self, query: &BuildingQuery) -> ZoneOutcome {
        let Some(raw) = query.municipality_code.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok((ZoneLookup::NoKey, false));
        };
        let code = normalize_municipality_code(raw);

        if let Some(hit) = self.zone_cache.get(&code) {
            return Ok((hit, true));
        }

        let lookup = match self.cache.municipality(&code).await? {
            Some(municipality) => ZoneLookup::Found(municipality.into()),
            None => ZoneLookup::NotFound {
                municipality_code: code.clone(),
            },
        };
        self.zone_cache.insert(code, lookup.clone());
        Ok((lookup, false))
    }

    async fn resolve_certificate(
        &self,
        query: &BuildingQuery,
        deadline: Instant,
    ) -> Result<(CertificateLookup, bool), SourceError> {
        let (Some(gnr), Some(bnr)) = (query.gnr, query.bnr) else {
            return Ok((CertificateLookup::NoKey, false));
        };
        let key = CertificateKey { gnr, bnr };

        let building = query
            .building_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        if let Some(number) = building {
            let (found, cached) = self.lookup_certificate(key, Some(number), deadline).await?;
            if let Some(certificate) = found {
                return Ok((CertificateLookup::found(certificate), cached));
            }
            debug!(gnr, bnr, building_number = number, "No certificate for building, trying property");
        }

        let (found, cached) = self.lookup_certificate(key, None, deadline).await?;
        let lookup = found.map_or(CertificateLookup::NotFound, CertificateLookup::found);
        Ok((lookup, cached))
    }

    async fn lookup_certificate(
        &self,
        key: CertificateKey,
        building_number: Option<&str>,
        deadline: Instant,
    ) -> Result<(Option<Certificate>, bool), SourceError> {
        let cache_key = (key, building_number.map(str::to_string));
        if let Some(hit) = self.certificate_cache.get(&cache_key) {
            return Ok((hit, true));
        }

        let found = Self::guarded(&self.circuits.certificate, deadline, self.timeouts.certificate, || {
            self.certificates.find(key.gnr, key.bnr, building_number)
        })
        .await?;
        self.certificate_cache.insert(cache_key, found.clone());
        Ok((found, false))
    }

    async fn resolve_pricing(
        &self,
        zone_cell: &OnceCell<ZoneOutcome>,
        query: &BuildingQuery,
        deadline: Instant,
    ) -> Result<(PriceSummary, bool), SourceError> {
        let (lookup, _) = self.shared_zone(zone_cell, query).await?;
        let zone = match lookup {
            ZoneLookup::Found(info) => info.zone,
            ZoneLookup::NoKey => return Err(SourceError::NoPriceZone("no municipality code given".into())),
            ZoneLookup::NotFound { municipality_code } => {
                return Err(SourceError::NoPriceZone(format!("unknown municipality {municipality_code}")))
            }
        };

        let (current, current_cached) = self.current_price(zone, deadline).await?;
        let (history, history_cached) = self.price_history(zone, deadline).await?;
        let summary = PriceSummary::build(zone, &current, &history)?;
        Ok((summary, current_cached && history_cached))
    }

    async fn current_price(&self, zone: PriceZone, deadline: Instant) -> Result<(PriceRecord, bool), SourceError> {
        if let Some(hit) = self.current_price_cache.get(&zone) {
            return Ok((hit, true));
        }

        let latest = Self::guarded(&self.circuits.pricing, deadline, self.timeouts.pricing, || {
            self.pricing.recent_prices(zone, 1)
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::Empty(format!("no current price for {zone}")))?;
        self.current_price_cache.insert(zone, latest.clone());
        Ok((latest, false))
    }

    async fn price_history(
        &self,
        zone: PriceZone,
        deadline: Instant,
    ) -> Result<(Arc<Vec<PriceRecord>>, bool), SourceError> {
        if let Some(hit) = self.history_cache.get(&zone) {
            return Ok((hit, true));
        }

        let records = Self::guarded(&self.circuits.pricing, deadline, self.timeouts.pricing, || {
            self.pricing.recent_prices(zone, PRICE_HISTORY_LEN)
        })
        .await?;
        if records.is_empty() {
            return Err(SourceError::Empty(format!("no price history for {zone}")));
        }
        let records = Arc::new(records);
        self.history_cache.insert(zone, Arc::clone(&records));
        Ok((records, false))
    }

    async fn resolve_footprint(
        &self,
        query: &BuildingQuery,
        deadline: Instant,
    ) -> Result<(Option<FootprintMatch>, bool), SourceError> {
        let candidates = Self::guarded(&self.circuits.footprint, deadline, self.timeouts.footprint, || {
            self.footprints
                .nearby(query.latitude, query.longitude, self.footprint_radius_m)
        })
        .await?;
        debug!(candidates = candidates.len(), "Footprint candidates");
        Ok((
            footprint::select_closest(candidates, query.latitude, query.longitude),
            false,
        ))
    }
}
