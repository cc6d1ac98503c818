// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Atomic JSON file writes (temp file in the target directory, fsync, rename).
//!
//! Readers of the snapshot directory never see a half-written file: either
//! the old content or the new content is in place.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use super::SnapshotError;

/// Pretty-print `value` and atomically replace `dir/file_name`.
pub async fn write_json<T: Serialize + ?Sized>(
    dir: &Path,
    file_name: &str,
    value: &T,
) -> Result<PathBuf, SnapshotError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let dir = dir.to_path_buf();
    let target = dir.join(file_name);

    let written = target.clone();
    tokio::task::spawn_blocking(move || persist_bytes(&dir, &target, &bytes))
        .await
        .map_err(|e| SnapshotError::Task(e.to_string()))??;

    debug!(path = %written.display(), "Snapshot file written");
    Ok(written)
}

fn persist_bytes(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: target.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(target).map_err(|e| io_err(e.error))?;
    Ok(())
}
