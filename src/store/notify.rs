// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Postgres LISTEN/NOTIFY bridge.
//!
//! Triggers on the configuration tables run
//! `pg_notify('config_changes', TG_TABLE_NAME)`. The listener turns each
//! payload into a [`ChangeEvent`] and republishes it on a broadcast channel
//! the cache's invalidation task reads from.

use std::time::Duration;

use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::traits::{ChangeEvent, StoreError};
use crate::domain::ConfigDomain;

pub const CHANGE_CHANNEL: &str = "config_changes";

pub struct PgChangeListener {
    pool: PgPool,
    channel: String,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgChangeListener {
    #[must_use]
    pub fn new(pool: PgPool, changes: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            pool,
            channel: CHANGE_CHANNEL.to_string(),
            changes,
        }
    }

    /// Listen on a different channel name.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Forward notifications until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(channel = %self.channel, "Listening for config changes");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                msg = listener.try_recv() => match msg {
                    Ok(Some(notification)) => {
                        let event = parse_payload(notification.payload());
                        debug!(payload = notification.payload(), ?event, "Config change");
                        self.publish(event);
                    }
                    Ok(None) => {
                        // Connection dropped; PgListener reconnects on the next
                        // call but anything sent meanwhile is gone.
                        warn!("Change listener reconnecting, invalidating all domains");
                        self.publish(ChangeEvent::All);
                    }
                    Err(e) => {
                        warn!(error = %e, "Change listener error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!("Change listener stopped");
        Ok(())
    }

    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(shutdown).await {
                warn!(error = %e, "Change listener exited");
            }
        })
    }

    fn publish(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }
}

/// Decode a notification payload.
///
/// Accepts a bare table or domain name, or a JSON object with a `table`
/// field. Anything unrecognised invalidates every domain.
#[must_use]
pub fn parse_payload(payload: &str) -> ChangeEvent {
    let payload = payload.trim();
    let name = if payload.starts_with('{') {
        serde_json::from_str::<Value>(payload)
            .ok()
            .and_then(|v| v.get("table").and_then(Value::as_str).map(String::from))
    } else {
        Some(payload.to_string())
    };

    name.and_then(|n| n.parse::<ConfigDomain>().ok())
        .map_or(ChangeEvent::All, ChangeEvent::Domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_name() {
        assert_eq!(
            parse_payload("tek17_requirements"),
            ChangeEvent::Domain(ConfigDomain::TekRequirements)
        );
        assert_eq!(
            parse_payload(" formulas "),
            ChangeEvent::Domain(ConfigDomain::Formulas)
        );
    }

    #[test]
    fn test_parse_json_payload() {
        assert_eq!(
            parse_payload(r#"{"table": "municipality_price_zones", "op": "UPDATE"}"#),
            ChangeEvent::Domain(ConfigDomain::Municipalities)
        );
    }

    #[test]
    fn test_unknown_payload_invalidates_all() {
        assert_eq!(parse_payload("users"), ChangeEvent::All);
        assert_eq!(parse_payload("{not json"), ChangeEvent::All);
        assert_eq!(parse_payload(""), ChangeEvent::All);
    }
}
