// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use super::traits::{ChangeEvent, RemoteStore, StoreError};
use crate::domain::ConfigDomain;

/// In-process remote store.
///
/// Tables that were never set behave like missing tables. Setting rows
/// publishes a [`ChangeEvent`] the same way a real store would.
pub struct InMemoryStore {
    tables: DashMap<ConfigDomain, Vec<Value>>,
    fetches: DashMap<ConfigDomain, AtomicU64>,
    unavailable: AtomicBool,
    latency: RwLock<Option<Duration>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            tables: DashMap::new(),
            fetches: DashMap::new(),
            unavailable: AtomicBool::new(false),
            latency: RwLock::new(None),
            changes,
        }
    }

    /// Builder-style table setup (no change event).
    #[must_use]
    pub fn with_rows(self, domain: ConfigDomain, rows: Vec<Value>) -> Self {
        self.tables.insert(domain, rows);
        self
    }

    /// Replace a table's rows and notify subscribers.
    pub fn set_rows(&self, domain: ConfigDomain, rows: Vec<Value>) {
        self.tables.insert(domain, rows);
        self.notify(ChangeEvent::Domain(domain));
    }

    /// Drop a table entirely (subsequent fetches see a missing table).
    pub fn drop_table(&self, domain: ConfigDomain) {
        self.tables.remove(&domain);
    }

    /// Simulate an outage: every fetch fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Publish a change event without touching data.
    pub fn notify(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.changes.send(event);
    }

    /// Number of fetches issued for a domain (including failed ones).
    #[must_use]
    pub fn fetch_count(&self, domain: ConfigDomain) -> u64 {
        self.fetches
            .get(&domain)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn fetch_rows(&self, domain: ConfigDomain) -> Result<Vec<Value>, StoreError> {
        self.fetches
            .entry(domain)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.read();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }

        self.tables
            .get(&domain)
            .map(|rows| rows.value().clone())
            .ok_or_else(|| StoreError::MissingTable(domain.table().to_string()))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        Some(self.changes.subscribe())
    }
}
