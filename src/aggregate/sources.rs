// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! External data sources behind the aggregator.
//!
//! Production implementations live in [`super::http`]; tests plug in their
//! own.

use async_trait::async_trait;

use super::types::{Certificate, Footprint, PriceRecord, SourceError};
use crate::domain::PriceZone;

/// The energy certificate register.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// At most one certificate for the property, or for one building on it
    /// when `building_number` is set.
    async fn find(
        &self,
        gnr: u32,
        bnr: u32,
        building_number: Option<&str>,
    ) -> Result<Option<Certificate>, SourceError>;
}

/// Weekly spot prices per zone.
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Up to `limit` records, most recent first.
    async fn recent_prices(&self, zone: PriceZone, limit: usize) -> Result<Vec<PriceRecord>, SourceError>;
}

/// Building outlines from map data.
#[async_trait]
pub trait FootprintSource: Send + Sync {
    /// Every building outline within `radius_m` of the point.
    async fn nearby(&self, latitude: f64, longitude: f64, radius_m: u32) -> Result<Vec<Footprint>, SourceError>;
}
