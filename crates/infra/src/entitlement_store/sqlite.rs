//! SQLite-backed entitlement storage.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::r#trait::{EntitlementStore, PersistenceError};

/// Durable key-value store in a local SQLite database.
///
/// One row per key; `updated_at` records the last write for diagnostics.
#[derive(Debug, Clone)]
pub struct SqliteEntitlementStore {
    pool: SqlitePool,
}

impl SqliteEntitlementStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create entitlement directory at {parent:?}"))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        Self::connect(options, 4)
            .await
            .with_context(|| format!("failed to open entitlement store at {path:?}"))
    }

    /// Open the database under the OS app data directory:
    /// `{data_dir}/entitle/entitlements.db`.
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = entitlement_db_path()?;
        Self::open(path).await
    }

    /// Private in-memory database (tests/dev). Lives as long as the store.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> anyhow::Result<Self> {
        // In-memory databases vanish with their connection, so never recycle it.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to create SQLite pool for entitlement store")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entitlements (
                key        TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create entitlements table")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl EntitlementStore for SqliteEntitlementStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT value
            FROM entitlements
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Read(e.to_string()))?;

        match row {
            Some(row) => {
                let value: String = row
                    .try_get("value")
                    .map_err(|e| PersistenceError::Read(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO entitlements (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key)
            DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Write(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            DELETE FROM entitlements
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Write(e.to_string()))?;

        Ok(())
    }
}

/// Resolve `{app_data_dir}/entitle/entitlements.db`.
fn entitlement_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("entitle");
    path.push("entitlements.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement_store::CURRENT_SUBSCRIPTION_KEY;

    #[tokio::test]
    async fn upsert_and_remove() {
        let store = SqliteEntitlementStore::in_memory().await.unwrap();
        assert_eq!(store.get(CURRENT_SUBSCRIPTION_KEY).await.unwrap(), None);

        store.set(CURRENT_SUBSCRIPTION_KEY, "sub.a").await.unwrap();
        store.set(CURRENT_SUBSCRIPTION_KEY, "sub.b").await.unwrap();
        assert_eq!(
            store.get(CURRENT_SUBSCRIPTION_KEY).await.unwrap().as_deref(),
            Some("sub.b")
        );

        store.remove(CURRENT_SUBSCRIPTION_KEY).await.unwrap();
        assert_eq!(store.get(CURRENT_SUBSCRIPTION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("entitlements.db");

        {
            let store = SqliteEntitlementStore::open(&path).await.unwrap();
            store.set(CURRENT_SUBSCRIPTION_KEY, "sub.plus").await.unwrap();
            store.pool.close().await;
        }

        let reopened = SqliteEntitlementStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(CURRENT_SUBSCRIPTION_KEY).await.unwrap().as_deref(),
            Some("sub.plus")
        );
    }
}
