// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::ConfigDomain;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The domain's table has not been created remotely.
    #[error("table '{0}' does not exist")]
    MissingTable(String),
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed rows in '{table}': {message}")]
    Decode { table: String, message: String },
}

/// Row-change notification from the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Rows of one domain changed
    Domain(ConfigDomain),
    /// Notifications may have been lost; treat every domain as changed
    All,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch every row of a domain's table (`select * from <table>`).
    async fn fetch_rows(&self, domain: ConfigDomain) -> Result<Vec<Value>, StoreError>;

    /// Subscribe to push change notifications.
    /// Stores without a push channel return `None`.
    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        None
    }
}
