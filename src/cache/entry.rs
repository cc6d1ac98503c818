// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{ConfigDomain, DomainMap};
use crate::formula::FormulaTable;

/// Where a served value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Fetched from the remote store within the domain TTL
    Fresh,
    /// Last good remote copy, served because a refresh failed
    Stale,
    /// Loaded from a verified on-disk snapshot
    Snapshot,
    /// Compiled-in default
    Default,
}

/// A value plus its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub value: T,
    pub freshness: Freshness,
}

impl<T> Served<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served {
            value: f(self.value),
            freshness: self.freshness,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Remote,
    Snapshot,
    Default,
}

/// One domain's content as held by the cache. Replaced whole, never mutated.
#[derive(Debug, Clone)]
pub struct DomainEntry {
    pub domain: ConfigDomain,
    pub map: Arc<DomainMap>,
    /// Parsed formulas; only set for the formulas domain
    pub formulas: Option<Arc<FormulaTable>>,
    pub fetched_at: Instant,
    pub ttl: Duration,
    pub origin: Origin,
    /// Forced expiry from an invalidation; data kept as a fallback
    pub invalidated: bool,
}

impl DomainEntry {
    pub fn new(domain: ConfigDomain, map: DomainMap, ttl: Duration, origin: Origin) -> Self {
        let formulas = (domain == ConfigDomain::Formulas).then(|| Arc::new(FormulaTable::from_domain(&map)));
        Self {
            domain,
            map: Arc::new(map),
            formulas,
            fetched_at: Instant::now(),
            ttl,
            origin,
            invalidated: false,
        }
    }

    /// Only remote data inside its TTL counts as fresh. Snapshot and default
    /// entries always trigger a refresh attempt.
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.origin == Origin::Remote
            && !self.invalidated
            && now.saturating_duration_since(self.fetched_at) < self.ttl
    }

    /// Freshness when served as a fallback after a failed refresh.
    #[must_use]
    pub fn fallback_freshness(&self) -> Freshness {
        match self.origin {
            Origin::Remote => Freshness::Stale,
            Origin::Snapshot => Freshness::Snapshot,
            Origin::Default => Freshness::Default,
        }
    }

    #[must_use]
    pub fn expired(&self) -> Self {
        Self {
            invalidated: true,
            ..self.clone()
        }
    }
}
