// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reads snapshots back from disk for cold starts.
//!
//! Only domains whose recomputed checksum matches the manifest are handed
//! out. A mismatching or unreadable file is skipped with a warning; the cache
//! then falls through to its compiled-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::manifest::{checksum, Manifest, MANIFEST_FILE};
use super::SnapshotError;
use crate::domain::{ConfigDomain, DomainMap};

/// Integrity of one domain snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Valid,
    Mismatch { expected: String, actual: String },
    /// Listed in the manifest but the file is gone
    Missing,
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainIntegrity {
    pub domain: ConfigDomain,
    pub integrity: Integrity,
}

#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load_manifest(&self) -> Result<Manifest, SnapshotError> {
        let path = self.dir.join(MANIFEST_FILE);
        let bytes = read(&path).await?;
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Manifest(e.to_string()))
    }

    /// Read one domain file without verification.
    pub async fn load_domain(&self, domain: ConfigDomain) -> Result<DomainMap, SnapshotError> {
        let path = self.dir.join(domain.snapshot_file());
        let bytes = read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every domain listed in the manifest whose checksum still matches.
    pub async fn load_verified(&self) -> Result<BTreeMap<ConfigDomain, DomainMap>, SnapshotError> {
        let manifest = self.load_manifest().await?;
        let mut verified = BTreeMap::new();

        for domain in ConfigDomain::ALL {
            let Some(expected) = manifest.checksum_for(domain.as_str()) else {
                continue;
            };
            match self.check(domain, expected).await {
                (Integrity::Valid, Some(map)) => {
                    debug!(domain = %domain, items = map.len(), "Snapshot verified");
                    verified.insert(domain, map);
                }
                (integrity, _) => {
                    warn!(domain = %domain, ?integrity, "Skipping snapshot that failed verification");
                }
            }
        }

        Ok(verified)
    }

    /// Integrity report for every domain listed in the manifest.
    pub async fn verify(&self) -> Result<Vec<DomainIntegrity>, SnapshotError> {
        let manifest = self.load_manifest().await?;
        let mut report = Vec::new();

        for domain in ConfigDomain::ALL {
            if let Some(expected) = manifest.checksum_for(domain.as_str()) {
                let (integrity, _) = self.check(domain, expected).await;
                report.push(DomainIntegrity { domain, integrity });
            }
        }

        Ok(report)
    }

    async fn check(&self, domain: ConfigDomain, expected: &str) -> (Integrity, Option<DomainMap>) {
        match self.load_domain(domain).await {
            Ok(map) => {
                let actual = checksum(&map);
                if actual == expected {
                    (Integrity::Valid, Some(map))
                } else {
                    (
                        Integrity::Mismatch {
                            expected: expected.to_string(),
                            actual,
                        },
                        None,
                    )
                }
            }
            Err(SnapshotError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                (Integrity::Missing, None)
            }
            Err(e) => (Integrity::Unreadable(e.to_string()), None),
        }
    }
}

async fn read(path: &Path) -> Result<Vec<u8>, SnapshotError> {
    tokio::fs::read(path).await.map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}
