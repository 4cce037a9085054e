// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

mod directory;
mod journey;
mod playbook;
mod workflow;

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

use crate::error::{Error, Result};

/// SQLite migrator with every schema migration embedded.
pub(crate) static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed store implementing every persistence trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        MIGRATOR.run(&pool).await?;
        info!("SQLite migrations applied");
        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file and apply migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::StorageUnavailable(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// In-memory database on a single connection, migrated.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::StorageUnavailable(e.to_string()))
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::StorageUnavailable(format!("malformed {column} column: {e}")))
}

pub(crate) fn decode<T>(what: &str, raw: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(raw).ok_or_else(|| Error::StorageUnavailable(format!("unrecognized {what} '{raw}'")))
}

pub(crate) fn decode_opt<T>(
    what: &str,
    raw: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    raw.map(|r| decode(what, r, &parse)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_apply_twice() {
        let store = SqliteStore::in_memory().await.expect("in-memory store");
        MIGRATOR
            .run(store.pool())
            .await
            .expect("re-running migrations is a no-op");
    }

    #[tokio::test]
    async fn test_from_path_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("atrium.db");
        let _store = SqliteStore::from_path(&path).await.expect("file store");
        assert!(path.exists());
    }

    #[test]
    fn test_decode_rejects_unknown() {
        let err = decode("state", "archived", crate::journey::NodeState::parse).unwrap_err();
        assert_eq!(err.kind(), "STORAGE_UNAVAILABLE");
    }
}
