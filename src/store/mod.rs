// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote configuration store backends.
//!
//! - [`traits`]: the [`RemoteStore`](traits::RemoteStore) seam and change events
//! - [`memory`]: in-process store for tests and local development
//! - [`postgres`]: Postgres-backed store (sqlx)
//! - [`notify`]: LISTEN/NOTIFY change listener feeding cache invalidation

pub mod traits;
pub mod memory;
pub mod postgres;
pub mod notify;

pub use traits::{ChangeEvent, RemoteStore, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use notify::PgChangeListener;
