// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Postgres-backed remote configuration store.
//!
//! Every domain lives in its own table. Rows are fetched as JSON objects so
//! the store needs no per-table column mapping:
//!
//! ```sql
//! SELECT row_to_json(t) FROM tek17_requirements t ORDER BY building_type;
//! ```
//!
//! A table that was never created surfaces as SQLSTATE `42P01` and maps to
//! [`StoreError::MissingTable`], which the snapshot builder treats as a soft
//! condition for optional domains.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::broadcast;
use tracing::debug;

use super::notify::PgChangeListener;
use super::traits::{ChangeEvent, RemoteStore, StoreError};
use crate::domain::ConfigDomain;
use crate::resilience::retry::{retry, RetryConfig};

const UNDEFINED_TABLE: &str = "42P01";
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = retry("pg_connect", &RetryConfig::startup(), || async {
            pool_options(DEFAULT_ACQUIRE_TIMEOUT)
                .connect(database_url)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        })
        .await?;

        Ok(Self::from_pool(pool))
    }

    /// Build the pool without opening a connection.
    ///
    /// Only a malformed URL fails here. An unreachable server surfaces later
    /// as [`StoreError::Unavailable`] from each `fetch_rows`, bounded by
    /// `acquire_timeout`.
    pub fn connect_lazy(database_url: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = pool_options(acquire_timeout)
            .connect_lazy(database_url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { pool, changes }
    }

    #[must_use]
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Listener that republishes `config_changes` notifications to this
    /// store's subscribers. Run it with [`PgChangeListener::spawn`].
    #[must_use]
    pub fn change_listener(&self) -> PgChangeListener {
        PgChangeListener::new(self.pool.clone(), self.changes.clone())
    }
}

fn pool_options(acquire_timeout: Duration) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .idle_timeout(Duration::from_secs(300))
}

fn select_all(domain: ConfigDomain) -> String {
    // Table and column names are compile-time constants, never user input
    format!(
        "SELECT row_to_json(t) FROM {} t ORDER BY {}",
        domain.table(),
        domain.order_field()
    )
}

fn map_sqlx_error(table: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
            StoreError::MissingTable(table.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Decode {
            table: table.to_string(),
            message: err.to_string(),
        },
        _ => StoreError::Unavailable(err.to_string()),
    }
}

#[async_trait]
impl RemoteStore for PgStore {
    async fn fetch_rows(&self, domain: ConfigDomain) -> Result<Vec<Value>, StoreError> {
        let sql = select_all(domain);
        let rows: Vec<Value> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(domain.table(), e))?;

        debug!(domain = %domain, rows = rows.len(), "Fetched domain rows");
        Ok(rows)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        Some(self.changes.subscribe())
    }
}
