// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;
use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::cache::ResolveError;
use crate::domain::{Municipality, PriceZone};
use crate::resilience::circuit_breaker::CircuitError;

/// Network tariff added to the spot price (øre/kWh).
pub const NETWORK_COST_ORE_KWH: f64 = 50.0;
/// Taxes and fees added to the spot price (øre/kWh).
pub const TAXES_ORE_KWH: f64 = 20.0;

/// Spot price in øre/kWh → total consumer price in kr/kWh.
#[must_use]
pub fn total_price_kr_kwh(spot_ore_kwh: f64) -> f64 {
    (spot_ore_kwh + NETWORK_COST_ORE_KWH + TAXES_ORE_KWH) / 100.0
}

// ═══════════════════════════════════════════════════════════════════════════
// Query
// ═══════════════════════════════════════════════════════════════════════════

/// One building lookup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildingQuery {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Municipality number (kommunenummer), any zero padding
    pub municipality_code: Option<String>,
    /// Farm number (gårdsnummer)
    pub gnr: Option<u32>,
    /// Title number (bruksnummer)
    pub bnr: Option<u32>,
    /// Building number within the property
    pub building_number: Option<String>,
}

impl BuildingQuery {
    pub fn new(address: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            address: address.into(),
            latitude,
            longitude,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_municipality(mut self, code: impl Into<String>) -> Self {
        self.municipality_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_parcel(mut self, gnr: u32, bnr: u32) -> Self {
        self.gnr = Some(gnr);
        self.bnr = Some(bnr);
        self
    }

    #[must_use]
    pub fn with_building_number(mut self, number: impl Into<String>) -> Self {
        self.building_number = Some(number.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Branch results
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Zone,
    Certificate,
    Pricing,
    Footprint,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Certificate => "certificate",
            Self::Pricing => "pricing",
            Self::Footprint => "footprint",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("circuit open, source temporarily disabled")]
    CircuitOpen,

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("no data: {0}")]
    Empty(String),

    #[error("no price zone: {0}")]
    NoPriceZone(String),

    #[error(transparent)]
    Config(#[from] ResolveError),
}

impl From<CircuitError<SourceError>> for SourceError {
    fn from(err: CircuitError<SourceError>) -> Self {
        match err {
            CircuitError::Rejected => SourceError::CircuitOpen,
            CircuitError::Inner(e) => e,
        }
    }
}

/// Outcome of one branch: a value or an error message, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult<T> {
    Resolved { value: T, served_from_cache: bool },
    Failed { error: String },
}

impl<T> SourceResult<T> {
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Resolved { value, .. } => Some(value),
            Self::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Resolved { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    #[must_use]
    pub fn served_from_cache(&self) -> bool {
        matches!(self, Self::Resolved { served_from_cache: true, .. })
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Resolved { value, .. } => Some(value),
            Self::Failed { .. } => None,
        }
    }
}

/// Wire shape: `{ value, error, servedFromCache }`.
impl<T: Serialize> Serialize for SourceResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("SourceResult", 3)?;
        s.serialize_field("value", &self.value())?;
        s.serialize_field("error", &self.error())?;
        s.serialize_field("servedFromCache", &self.served_from_cache())?;
        s.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchError {
    pub source: SourceKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub zone: SourceResult<ZoneLookup>,
    pub certificate: SourceResult<CertificateLookup>,
    pub pricing: SourceResult<PriceSummary>,
    pub footprint: SourceResult<Option<FootprintMatch>>,
    pub has_errors: bool,
    pub errors: Vec<BranchError>,
}

impl AggregateResult {
    pub fn new(
        zone: SourceResult<ZoneLookup>,
        certificate: SourceResult<CertificateLookup>,
        pricing: SourceResult<PriceSummary>,
        footprint: SourceResult<Option<FootprintMatch>>,
    ) -> Self {
        let errors: Vec<BranchError> = [
            (SourceKind::Zone, zone.error()),
            (SourceKind::Certificate, certificate.error()),
            (SourceKind::Pricing, pricing.error()),
            (SourceKind::Footprint, footprint.error()),
        ]
        .into_iter()
        .filter_map(|(source, error)| {
            error.map(|message| BranchError {
                source,
                message: message.to_string(),
            })
        })
        .collect();

        Self {
            has_errors: !errors.is_empty(),
            errors,
            zone,
            certificate,
            pricing,
            footprint,
        }
    }

    #[must_use]
    pub fn failed(&self, source: SourceKind) -> bool {
        self.errors.iter().any(|e| e.source == source)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Zone
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneInfo {
    pub municipality_code: String,
    pub municipality_name: Option<String>,
    pub fylke: Option<String>,
    pub zone: PriceZone,
    pub zone_name: &'static str,
}

impl From<Municipality> for ZoneInfo {
    fn from(m: Municipality) -> Self {
        Self {
            municipality_code: m.code,
            municipality_name: m.name,
            fylke: m.fylke.filter(|f| !f.is_empty()),
            zone_name: m.price_zone.display_name(),
            zone: m.price_zone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ZoneLookup {
    /// No municipality code in the query
    NoKey,
    NotFound { municipality_code: String },
    Found(ZoneInfo),
}

impl ZoneLookup {
    #[must_use]
    pub fn zone(&self) -> Option<PriceZone> {
        match self {
            Self::Found(info) => Some(info.zone),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Certificate
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyGrade {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl EnergyGrade {
    /// Grade from the leading letter of a raw class string (`" b "`, `"A+"`).
    #[must_use]
    pub fn from_class(raw: &str) -> Option<Self> {
        match raw.trim_start().chars().next()?.to_ascii_uppercase() {
            'A' => Some(Self::A),
            'B' => Some(Self::B),
            'C' => Some(Self::C),
            'D' => Some(Self::D),
            'E' => Some(Self::E),
            'F' => Some(Self::F),
            'G' => Some(Self::G),
            _ => None,
        }
    }
}

/// A row of the certificate register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub gnr: u32,
    pub bnr: u32,
    #[serde(default)]
    pub building_number: Option<String>,
    #[serde(default)]
    pub energy_class: Option<String>,
    #[serde(default)]
    pub energy_consumption: Option<f64>,
    #[serde(default)]
    pub building_category: Option<String>,
    #[serde(default)]
    pub construction_year: Option<i32>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub heating_class: Option<String>,
    /// m²
    #[serde(default)]
    pub heated_area: Option<f64>,
}

impl Certificate {
    #[must_use]
    pub fn grade(&self) -> Option<EnergyGrade> {
        self.energy_class.as_deref().and_then(EnergyGrade::from_class)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CertificateLookup {
    /// Farm and title number were not both supplied
    NoKey,
    /// Key supplied, no certificate registered
    NotFound,
    Found {
        certificate: Certificate,
        grade: Option<EnergyGrade>,
    },
}

impl CertificateLookup {
    #[must_use]
    pub fn found(certificate: Certificate) -> Self {
        Self::Found {
            grade: certificate.grade(),
            certificate,
        }
    }

    #[must_use]
    pub fn certificate(&self) -> Option<&Certificate> {
        match self {
            Self::Found { certificate, .. } => Some(certificate),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Pricing
// ═══════════════════════════════════════════════════════════════════════════

/// One weekly spot price as stored by the pricing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub year: i32,
    pub week_number: u32,
    #[serde(default)]
    pub week: Option<String>,
    pub spot_price_ore_kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub year: i32,
    pub week_number: u32,
    pub spot_price_ore_kwh: f64,
    pub total_price_kr_kwh: f64,
}

impl From<&PriceRecord> for PricePoint {
    fn from(r: &PriceRecord) -> Self {
        Self {
            year: r.year,
            week_number: r.week_number,
            spot_price_ore_kwh: r.spot_price_ore_kwh,
            total_price_kr_kwh: total_price_kr_kwh(r.spot_price_ore_kwh),
        }
    }
}

/// Current price plus rolling averages. Averages are total kr/kWh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSummary {
    pub zone: PriceZone,
    pub current: PricePoint,
    pub average_3: f64,
    pub average_12: f64,
    pub average_36: f64,
    /// Chronological (oldest first)
    pub history: Vec<PricePoint>,
}

impl PriceSummary {
    /// `recent` is most-recent-first and must not be empty.
    pub fn build(zone: PriceZone, current: &PriceRecord, recent: &[PriceRecord]) -> Result<Self, SourceError> {
        if recent.is_empty() {
            return Err(SourceError::Empty(format!("no price history for {zone}")));
        }

        let average = |n: usize| {
            let window = &recent[..n.min(recent.len())];
            let spot = window.iter().map(|r| r.spot_price_ore_kwh).sum::<f64>() / window.len() as f64;
            total_price_kr_kwh(spot)
        };

        Ok(Self {
            zone,
            current: PricePoint::from(current),
            average_3: average(3),
            average_12: average(12),
            average_36: average(36),
            history: recent.iter().rev().map(PricePoint::from).collect(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Footprint
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Footprint {
    pub id: String,
    /// Norwegian building category
    pub building_type: String,
    /// Closed ring of `[lat, lon]` pairs
    pub coordinates: Vec<[f64; 2]>,
    pub area_m2: Option<f64>,
    pub levels: Option<u32>,
    pub height_m: Option<f64>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub building_number: Option<String>,
    /// Short label like "KJG1" for "Karl Johans gate 1"
    pub address_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintMatch {
    pub primary: Footprint,
    pub alternates: Vec<Footprint>,
}
