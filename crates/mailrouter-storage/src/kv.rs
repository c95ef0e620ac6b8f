//! Key-value store with per-entry TTL
//!
//! Semantics are deliberately weak: no transactions, and readers may observe
//! stale values. Callers doing read-modify-write accept lost updates.

use crate::db::DatabasePool;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Key-value backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for KvError {
    fn from(e: sqlx::Error) -> Self {
        KvError::Backend(e.to_string())
    }
}

impl From<KvError> for mailrouter_common::Error {
    fn from(e: KvError) -> Self {
        mailrouter_common::Error::Storage(e.to_string())
    }
}

/// Key-value result type
pub type KvResult<T> = Result<T, KvError>;

/// External key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a live value
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Store a value that expires `ttl_secs` from now
    async fn put(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<()>;

    /// Backend liveness probe
    async fn ping(&self) -> KvResult<()> {
        Ok(())
    }
}

/// TTLs are capped at roughly a century to stay inside chrono's range
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

fn expiry_from_now(ttl_secs: u64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64)
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteKvStore {
    db_pool: DatabasePool,
}

impl SqliteKvStore {
    /// Create a store over an already migrated pool
    pub fn new(db_pool: DatabasePool) -> Self {
        Self { db_pool }
    }

    /// Delete expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> KvResult<u64> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?1")
            .bind(Utc::now().timestamp())
            .execute(self.db_pool.pool())
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, "Purged expired key-value entries");
        }
        Ok(removed)
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM kv_entries WHERE key = ?1 AND expires_at > ?2")
                .bind(key)
                .bind(Utc::now().timestamp())
                .fetch_optional(self.db_pool.pool())
                .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn put(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key)
            DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_from_now(ttl_secs).timestamp())
        .execute(self.db_pool.pool())
        .await?;

        Ok(())
    }

    async fn ping(&self) -> KvResult<()> {
        self.db_pool
            .health_check()
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}

/// In-process store
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, (Vec<u8>, DateTime<Utc>)>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.read().await;
        entries.values().filter(|(_, expires)| *expires > now).count()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(value, _)| value.clone()))
    }

    async fn put(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value.to_vec(), expiry_from_now(ttl_secs)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn sqlite_store() -> SqliteKvStore {
        let db = DatabasePool::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        SqliteKvStore::new(db)
    }

    #[tokio::test]
    async fn test_sqlite_put_get_overwrite() {
        let store = sqlite_store().await;

        assert_eq!(store.get("missing").await.unwrap(), None);

        store.put("k", b"one", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"one".to_vec()));

        store.put("k", b"two", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_sqlite_expired_entries_are_invisible_and_purged() {
        let store = sqlite_store().await;

        store.put("stale", b"x", 0).await.unwrap();
        store.put("fresh", b"y", 3600).await.unwrap();

        assert_eq!(store.get("stale").await.unwrap(), None);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.get("fresh").await.unwrap(), Some(b"y".to_vec()));
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_ttl() {
        let store = MemoryKvStore::new();

        store.put("a:1", b"1", 60).await.unwrap();
        store.put("a:2", b"2", 0).await.unwrap();
        store.put("b:1", b"3", 60).await.unwrap();

        assert_eq!(store.get("a:1").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("a:2").await.unwrap(), None);
        assert_eq!(store.len().await, 2);
    }
}
