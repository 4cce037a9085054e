// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};

use super::SqliteStore;
use crate::error::{Error, Result};
use crate::persistence::PlaybookStore;
use crate::playbook::{ActivePointer, PlaybookVersion};

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: String,
    playbook_id: String,
    version: String,
    checksum: String,
    raw: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl From<VersionRow> for PlaybookVersion {
    fn from(row: VersionRow) -> Self {
        Self {
            id: row.id,
            playbook_id: row.playbook_id,
            version: row.version,
            checksum: row.checksum,
            raw: row.raw,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PointerRow {
    scope: String,
    version_id: String,
    checksum: String,
    updated_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl PlaybookStore for SqliteStore {
    async fn find_version_by_checksum(&self, checksum: &str) -> Result<Option<PlaybookVersion>> {
        let row = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, playbook_id, version, checksum, raw, created_at
            FROM playbook_versions
            WHERE checksum = ?
            "#,
        )
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_version(&self, version_id: &str) -> Result<Option<PlaybookVersion>> {
        let row = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, playbook_id, version, checksum, raw, created_at
            FROM playbook_versions
            WHERE id = ?
            "#,
        )
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_version(&self, version: &PlaybookVersion) -> Result<PlaybookVersion> {
        sqlx::query(
            r#"
            INSERT INTO playbook_versions (id, playbook_id, version, checksum, raw, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(checksum) DO NOTHING
            "#,
        )
        .bind(&version.id)
        .bind(&version.playbook_id)
        .bind(&version.version)
        .bind(&version.checksum)
        .bind(&version.raw)
        .bind(version.created_at)
        .execute(&self.pool)
        .await?;

        // Either ours or the row a concurrent writer stored first.
        self.find_version_by_checksum(&version.checksum)
            .await?
            .ok_or_else(|| {
                Error::StorageUnavailable(format!(
                    "playbook version {} vanished after insert",
                    version.checksum
                ))
            })
    }

    async fn active_pointer(&self, scope: &str) -> Result<Option<ActivePointer>> {
        let row = sqlx::query_as::<_, PointerRow>(
            r#"
            SELECT scope, version_id, checksum, updated_at
            FROM playbook_active
            WHERE scope = ?
            "#,
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ActivePointer {
            scope: r.scope,
            version_id: r.version_id,
            checksum: r.checksum,
            updated_at: r.updated_at,
        }))
    }

    async fn swap_active_pointer(
        &self,
        scope: &str,
        expected: Option<&str>,
        version_id: &str,
        checksum: &str,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO playbook_active (scope, version_id, checksum, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(scope) DO NOTHING
                    "#,
                )
                .bind(scope)
                .bind(version_id)
                .bind(checksum)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE playbook_active
                    SET version_id = ?, checksum = ?, updated_at = ?
                    WHERE scope = ? AND checksum = ?
                    "#,
                )
                .bind(version_id)
                .bind(checksum)
                .bind(now)
                .bind(scope)
                .bind(expected)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::checksum_hex;

    fn version(id: &str, raw: &[u8]) -> PlaybookVersion {
        PlaybookVersion {
            id: id.to_string(),
            playbook_id: "phd".into(),
            version: "1".into(),
            checksum: checksum_hex(raw),
            raw: raw.to_vec(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_same_checksum_returns_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store.insert_version(&version("v1", b"doc")).await.unwrap();
        let second = store.insert_version(&version("v2", b"doc")).await.unwrap();
        assert_eq!(first.id, "v1");
        assert_eq!(second.id, "v1");
        assert!(store.get_version("v2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pointer_compare_and_swap() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.insert_version(&version("a", b"a")).await.unwrap();
        let b = store.insert_version(&version("b", b"b")).await.unwrap();

        assert!(store.swap_active_pointer("t1", None, &a.id, &a.checksum).await.unwrap());
        // Second "create" loses: a pointer already exists.
        assert!(!store.swap_active_pointer("t1", None, &b.id, &b.checksum).await.unwrap());
        // Stale expectation loses.
        assert!(
            !store
                .swap_active_pointer("t1", Some(&b.checksum), &b.id, &b.checksum)
                .await
                .unwrap()
        );
        assert!(
            store
                .swap_active_pointer("t1", Some(&a.checksum), &b.id, &b.checksum)
                .await
                .unwrap()
        );
        let pointer = store.active_pointer("t1").await.unwrap().unwrap();
        assert_eq!(pointer.version_id, "b");
        assert!(store.active_pointer("t2").await.unwrap().is_none());
    }
}
