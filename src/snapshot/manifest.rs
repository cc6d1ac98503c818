// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot manifest and content checksums.
//!
//! The checksum of a domain is SHA-256 over the compact JSON encoding of its
//! [`DomainMap`]. Keys are sorted, so identical content always hashes the
//! same no matter which order rows came back in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::DomainMap;

/// Manifest schema version.
pub const MANIFEST_VERSION: &str = "1.0.0";

/// File name of the manifest inside the snapshot directory.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    /// `success` if all domains made it, `partial` if some did, `failed` if none.
    #[must_use]
    pub fn from_counts(succeeded: usize, total: usize) -> Self {
        if total > 0 && succeeded == total {
            Self::Success
        } else if succeeded > 0 {
            Self::Partial
        } else {
            Self::Failed
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Where the data came from
    pub source: String,
    /// Wall-clock sync time in milliseconds
    pub duration: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Soft conditions (missing optional tables, reused snapshots)
    #[serde(default)]
    pub notices: Vec<String>,
    /// Domains whose checksum changed since the previous manifest
    #[serde(default)]
    pub changed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub generated: DateTime<Utc>,
    pub environment: String,
    /// Item count per synced domain
    pub items: BTreeMap<String, usize>,
    /// Content checksum per synced domain
    pub checksums: BTreeMap<String, String>,
    pub last_sync_timestamp: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub sync_metadata: SyncMetadata,
}

impl Manifest {
    /// Total items across all domains.
    #[must_use]
    pub fn total_items(&self) -> usize {
        self.items.values().sum()
    }

    #[must_use]
    pub fn checksum_for(&self, domain: &str) -> Option<&str> {
        self.checksums.get(domain).map(String::as_str)
    }
}

/// Canonical bytes of a domain map (compact JSON, sorted keys).
#[must_use]
pub fn canonical_bytes(map: &DomainMap) -> Vec<u8> {
    // Maps of serde_json::Value with string keys cannot fail to serialize
    serde_json::to_vec(map).unwrap_or_default()
}

/// Hex SHA-256 of a domain's canonical bytes.
#[must_use]
pub fn checksum(map: &DomainMap) -> String {
    hex::encode(Sha256::digest(canonical_bytes(map)))
}
