// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `snapshot-sync`: pull every configuration domain from Postgres into
//! checksummed JSON snapshots.
//!
//! Exits non-zero only when the manifest cannot be written. Per-domain
//! failures are reported in the manifest and logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use energy_resolver::snapshot::{DomainOutcome, Integrity};
use energy_resolver::store::postgres::DEFAULT_ACQUIRE_TIMEOUT;
use energy_resolver::{PgStore, ResolverConfig, SnapshotBuilder, SnapshotLoader, SyncStatus};

#[derive(Parser, Debug)]
#[command(name = "snapshot-sync", version, about = "Write checksummed configuration snapshots")]
struct Cli {
    /// Postgres connection string (defaults to DATABASE_URL)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Output directory for domain files and manifest.json
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,

    /// Environment label recorded in the manifest
    #[arg(long)]
    environment: Option<String>,

    /// Re-sync every N seconds until interrupted (0 = run once)
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Only verify existing snapshots against the manifest
    #[arg(long, conflicts_with = "interval")]
    verify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = ResolverConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    if let Some(dir) = cli.dir {
        config.snapshot_dir = dir;
    }
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }
    if let Some(secs) = cli.interval {
        config.sync_interval_secs = secs;
    }

    if cli.verify {
        return verify(&config).await;
    }

    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("no database URL: pass --database-url or set DATABASE_URL"))?;
    // An unreachable store fails per domain inside the sync, not here
    let store = PgStore::connect_lazy(url, DEFAULT_ACQUIRE_TIMEOUT).context("parsing database URL")?;
    let builder = SnapshotBuilder::from_config(Arc::new(store), &config);

    if config.sync_interval_secs == 0 {
        return sync_once(&builder).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing current run");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(interval_secs = config.sync_interval_secs, dir = %config.snapshot_dir.display(), "Scheduled sync started");
    builder
        .run_every(Duration::from_secs(config.sync_interval_secs), shutdown_rx)
        .await;
    Ok(())
}

async fn sync_once(builder: &SnapshotBuilder) -> Result<()> {
    let report = builder.sync_all().await.context("writing snapshot manifest")?;

    for (domain, outcome) in &report.outcomes {
        match outcome {
            DomainOutcome::Synced { items, .. } => info!(%domain, items, "synced"),
            DomainOutcome::Fallback { items, notice, .. } => warn!(%domain, items, %notice, "fallback"),
            DomainOutcome::Failed { error } => warn!(%domain, %error, "failed"),
        }
    }

    info!(
        status = report.status().as_str(),
        items = report.manifest.total_items(),
        manifest = %report.manifest_path.display(),
        "Snapshot sync finished"
    );
    if report.status() == SyncStatus::Failed {
        warn!("No domain could be synced; last verified snapshots kept in the manifest");
    }
    Ok(())
}

async fn verify(config: &ResolverConfig) -> Result<()> {
    let loader = SnapshotLoader::new(&config.snapshot_dir);
    let results = loader.verify().await.context("reading manifest")?;

    let mut bad = 0;
    for entry in &results {
        match &entry.integrity {
            Integrity::Valid => info!(domain = %entry.domain, "valid"),
            other => {
                bad += 1;
                warn!(domain = %entry.domain, result = ?other, "invalid");
            }
        }
    }

    if bad > 0 {
        return Err(anyhow!("{bad} of {} snapshot files failed verification", results.len()));
    }
    Ok(())
}
