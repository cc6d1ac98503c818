// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot builder: remote configuration → checksummed local files.
//!
//! ```text
//!   RemoteStore ──fetch (retry)──► keyed DomainMap ──► <domain>.json
//!        │                                │
//!        │  one task per domain           └─ sha256 ─► manifest.json
//!        ▼
//!   failures recorded per domain, never abort the run
//! ```
//!
//! A run's outcome is `success` when every domain synced, `partial` when at
//! least one did, `failed` when none did. Only a manifest write failure is
//! returned as an error.

pub mod loader;
pub mod manifest;
pub mod writer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::config::ResolverConfig;
use crate::domain::{ConfigDomain, DomainMap};
use crate::resilience::retry::{retry_if, RetryConfig};
use crate::store::{RemoteStore, StoreError};

pub use loader::{DomainIntegrity, Integrity, SnapshotLoader};
pub use manifest::{checksum, Manifest, SyncMetadata, SyncStatus, MANIFEST_FILE, MANIFEST_VERSION};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid manifest: {0}")]
    Manifest(String),
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result of syncing one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainOutcome {
    Synced { items: usize, checksum: String },
    /// Optional table missing remotely; previous snapshot (or an empty map) kept
    Fallback { items: usize, checksum: String, notice: String },
    Failed { error: String },
}

impl DomainOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Synced { .. } => "synced",
            Self::Fallback { .. } => "fallback",
            Self::Failed { .. } => "failed",
        }
    }
}

/// What a sync run produced: the written manifest plus per-domain outcomes.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub manifest: Manifest,
    pub outcomes: BTreeMap<ConfigDomain, DomainOutcome>,
    pub manifest_path: PathBuf,
}

impl SyncReport {
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.manifest.sync_status
    }
}

pub struct SnapshotBuilder {
    store: Arc<dyn RemoteStore>,
    dir: PathBuf,
    environment: String,
    source: String,
    domains: Vec<ConfigDomain>,
    retry: RetryConfig,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn RemoteStore>, dir: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            store,
            dir: dir.into(),
            environment: environment.into(),
            source: "postgres".to_string(),
            domains: ConfigDomain::ALL.to_vec(),
            retry: RetryConfig::query(),
        }
    }

    #[must_use]
    pub fn from_config(store: Arc<dyn RemoteStore>, config: &ResolverConfig) -> Self {
        Self::new(store, config.snapshot_dir.clone(), config.environment.clone())
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Restrict the run to a subset of domains.
    #[must_use]
    pub fn with_domains(mut self, domains: Vec<ConfigDomain>) -> Self {
        self.domains = domains;
        self
    }

    /// Label written to `syncMetadata.source`.
    #[must_use]
    pub fn with_source_label(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sync every configured domain and write the manifest.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn sync_all(&self) -> Result<SyncReport, SnapshotError> {
        let start = Instant::now();
        info!(domains = self.domains.len(), "Starting snapshot sync");

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SnapshotError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let loader = SnapshotLoader::new(&self.dir);
        let previous = loader.load_manifest().await.ok();

        let results = join_all(self.domains.iter().map(|&d| async move { (d, self.sync_domain(d).await) })).await;
        let outcomes: BTreeMap<ConfigDomain, DomainOutcome> = results.into_iter().collect();

        let mut items = BTreeMap::new();
        let mut checksums = BTreeMap::new();
        let mut errors = Vec::new();
        let mut notices = Vec::new();
        let mut changed = Vec::new();

        for (domain, outcome) in &outcomes {
            let name = domain.as_str().to_string();
            match outcome {
                DomainOutcome::Synced { items: n, checksum }
                | DomainOutcome::Fallback { items: n, checksum, .. } => {
                    let previous_sum = previous.as_ref().and_then(|m| m.checksum_for(&name));
                    if previous_sum != Some(checksum.as_str()) {
                        changed.push(name.clone());
                    }
                    if let DomainOutcome::Fallback { notice, .. } = outcome {
                        notices.push(format!("{name}: {notice}"));
                    }
                    items.insert(name.clone(), *n);
                    checksums.insert(name, checksum.clone());
                }
                DomainOutcome::Failed { error } => {
                    errors.push(format!("{name}: {error}"));
                    let kept = match previous.as_ref() {
                        Some(prev) => carry_forward(&loader, *domain, prev).await,
                        None => None,
                    };
                    if let Some((n, sum)) = kept {
                        notices.push(format!("{name}: sync failed, kept previous snapshot"));
                        items.insert(name.clone(), n);
                        checksums.insert(name, sum);
                    }
                }
            }
        }

        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let status = SyncStatus::from_counts(succeeded, outcomes.len());
        let duration = start.elapsed();
        let now = Utc::now();

        let manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            generated: now,
            environment: self.environment.clone(),
            items,
            checksums,
            last_sync_timestamp: now,
            sync_status: status,
            sync_metadata: SyncMetadata {
                source: self.source.clone(),
                duration: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                errors,
                notices,
                changed,
            },
        };

        let manifest_path = writer::write_json(&self.dir, MANIFEST_FILE, &manifest).await?;
        crate::metrics::record_snapshot_run(status.as_str(), duration);

        info!(
            status = status.as_str(),
            items = manifest.total_items(),
            changed = manifest.sync_metadata.changed.len(),
            duration_ms = duration.as_millis() as u64,
            "Snapshot sync complete"
        );

        Ok(SyncReport {
            manifest,
            outcomes,
            manifest_path,
        })
    }

    async fn sync_domain(&self, domain: ConfigDomain) -> DomainOutcome {
        let store = &self.store;
        let fetched = retry_if(
            &format!("fetch_{}", domain.as_str()),
            &self.retry,
            move || store.fetch_rows(domain),
            |e| !matches!(e, StoreError::MissingTable(_)),
        )
        .await;

        let outcome = match fetched {
            Ok(rows) => {
                let map = domain.keyed_map(rows);
                match writer::write_json(&self.dir, domain.snapshot_file(), &map).await {
                    Ok(_) => DomainOutcome::Synced {
                        items: map.len(),
                        checksum: checksum(&map),
                    },
                    Err(e) => DomainOutcome::Failed { error: e.to_string() },
                }
            }
            Err(StoreError::MissingTable(table)) if domain.is_optional() => {
                self.fallback(domain, &table).await
            }
            Err(e) => DomainOutcome::Failed { error: e.to_string() },
        };

        match &outcome {
            DomainOutcome::Synced { items, .. } => {
                info!(domain = %domain, items, "Domain synced");
                crate::metrics::record_snapshot_domain(domain.as_str(), outcome.label(), *items);
            }
            DomainOutcome::Fallback { items, notice, .. } => {
                warn!(domain = %domain, items, %notice, "Domain kept from fallback");
                crate::metrics::record_snapshot_domain(domain.as_str(), outcome.label(), *items);
            }
            DomainOutcome::Failed { error } => {
                error!(domain = %domain, %error, "Domain sync failed");
                crate::metrics::record_snapshot_domain(domain.as_str(), outcome.label(), 0);
            }
        }
        outcome
    }

    /// Optional table missing remotely: reuse the last snapshot, or write an
    /// empty one so readers always find a file.
    async fn fallback(&self, domain: ConfigDomain, table: &str) -> DomainOutcome {
        let loader = SnapshotLoader::new(&self.dir);
        if let Ok(map) = loader.load_domain(domain).await {
            return DomainOutcome::Fallback {
                items: map.len(),
                checksum: checksum(&map),
                notice: format!("table '{table}' missing, kept previous snapshot"),
            };
        }

        let empty = DomainMap::new();
        match writer::write_json(&self.dir, domain.snapshot_file(), &empty).await {
            Ok(_) => DomainOutcome::Fallback {
                items: 0,
                checksum: checksum(&empty),
                notice: format!("table '{table}' missing, wrote empty snapshot"),
            },
            Err(e) => DomainOutcome::Failed { error: e.to_string() },
        }
    }

    /// Run [`sync_all`](Self::sync_all) on a fixed interval until `shutdown`
    /// becomes true. The first run starts immediately.
    pub async fn run_every(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_all().await {
                        error!(error = %e, "Scheduled snapshot sync could not write manifest");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Snapshot scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Item count and checksum of the last snapshot of `domain`, if the previous
/// manifest lists it and the file on disk still matches.
async fn carry_forward(loader: &SnapshotLoader, domain: ConfigDomain, previous: &Manifest) -> Option<(usize, String)> {
    let expected = previous.checksum_for(domain.as_str())?;
    let map = loader.load_domain(domain).await.ok()?;
    let actual = checksum(&map);
    (actual == expected).then(|| (map.len(), actual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn store() -> InMemoryStore {
        InMemoryStore::new()
            .with_rows(
                ConfigDomain::Calculations,
                vec![
                    json!({"name": "grid_rent", "value": 0.5}),
                    json!({"name": "bra_adjustment", "value": 8}),
                ],
            )
            .with_rows(
                ConfigDomain::Content,
                vec![json!({"key": "app.title", "norwegian_text": "Energianalyse"})],
            )
            .with_rows(ConfigDomain::FeatureFlags, vec![])
            .with_rows(ConfigDomain::Formulas, vec![])
            .with_rows(ConfigDomain::TekRequirements, vec![])
            .with_rows(ConfigDomain::Municipalities, vec![])
    }

    fn builder(store: InMemoryStore, dir: &Path) -> SnapshotBuilder {
        SnapshotBuilder::new(Arc::new(store), dir, "test").with_retry(RetryConfig::test())
    }

    #[tokio::test]
    async fn test_missing_optional_table_is_soft() {
        let dir = tempfile::tempdir().unwrap();

        let report = builder(store(), dir.path()).sync_all().await.unwrap();

        assert_eq!(report.status(), SyncStatus::Success);
        assert!(matches!(
            report.outcomes[&ConfigDomain::HeatSources],
            DomainOutcome::Fallback { items: 0, .. }
        ));
        assert!(dir.path().join("heat-sources.json").exists());
        assert_eq!(report.manifest.sync_metadata.notices.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_optional_table_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let with_heat = store().with_rows(
            ConfigDomain::HeatSources,
            vec![json!({"name": "air_water", "priority": 1})],
        );
        builder(with_heat, dir.path()).sync_all().await.unwrap();

        let report = builder(store(), dir.path()).sync_all().await.unwrap();

        assert_eq!(report.manifest.items["heat_sources"], 1);
        assert!(!report.manifest.sync_metadata.changed.contains(&"heat_sources".to_string()));
    }

    #[tokio::test]
    async fn test_missing_required_table_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        s.drop_table(ConfigDomain::Content);

        let report = builder(s, dir.path()).sync_all().await.unwrap();

        assert_eq!(report.status(), SyncStatus::Partial);
        assert!(!report.manifest.items.contains_key("content"));
        assert!(!report.manifest.checksums.contains_key("content"));
        assert!(report.manifest.sync_metadata.errors[0].starts_with("content:"));
    }

    #[tokio::test]
    async fn test_store_down_is_failed_but_manifest_written() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        s.set_unavailable(true);

        let report = builder(s, dir.path()).sync_all().await.unwrap();

        assert_eq!(report.status(), SyncStatus::Failed);
        assert_eq!(report.manifest.sync_metadata.errors.len(), 7);
        assert!(report.manifest_path.exists());
    }

    #[tokio::test]
    async fn test_failed_run_keeps_last_verified_domains() {
        let dir = tempfile::tempdir().unwrap();
        let first = builder(store(), dir.path()).sync_all().await.unwrap();

        let down = store();
        down.set_unavailable(true);
        let second = builder(down, dir.path()).sync_all().await.unwrap();

        assert_eq!(second.status(), SyncStatus::Failed);
        assert_eq!(second.manifest.sync_metadata.errors.len(), 7);
        assert_eq!(second.manifest.checksums, first.manifest.checksums);
        assert_eq!(second.manifest.items, first.manifest.items);
        assert!(second.manifest.sync_metadata.changed.is_empty());

        let verified = SnapshotLoader::new(dir.path()).load_verified().await.unwrap();
        assert_eq!(verified.len(), 7);
    }

    #[tokio::test]
    async fn test_failed_domain_with_tampered_file_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        builder(store(), dir.path()).sync_all().await.unwrap();
        std::fs::write(dir.path().join(ConfigDomain::Content.snapshot_file()), b"{}").unwrap();

        let s = store();
        s.drop_table(ConfigDomain::Content);
        let report = builder(s, dir.path()).sync_all().await.unwrap();

        assert_eq!(report.status(), SyncStatus::Partial);
        assert!(!report.manifest.checksums.contains_key("content"));
        assert!(report.manifest.checksums.contains_key("calculations"));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let s = Arc::new(store());
        s.set_unavailable(true);

        let b = SnapshotBuilder::new(s.clone(), dir.path(), "test")
            .with_retry(RetryConfig::test())
            .with_domains(vec![ConfigDomain::Calculations]);
        b.sync_all().await.unwrap();

        assert_eq!(s.fetch_count(ConfigDomain::Calculations), 3);
    }

    #[tokio::test]
    async fn test_first_run_marks_everything_changed() {
        let dir = tempfile::tempdir().unwrap();

        let first = builder(store(), dir.path()).sync_all().await.unwrap();
        let second = builder(store(), dir.path()).sync_all().await.unwrap();

        assert_eq!(first.manifest.sync_metadata.changed.len(), 7);
        assert!(second.manifest.sync_metadata.changed.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let result = builder(store(), &file).sync_all().await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_every_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let b = builder(store(), dir.path());
        let (tx, rx) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(b.run_every(Duration::from_secs(3600), rx), stopper);

        assert!(dir.path().join(MANIFEST_FILE).exists());
    }
}
