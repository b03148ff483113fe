//! Document operations for the SQLite store.
//!
//! Each cache key maps to one row of the `documents` table; a namespace
//! exists when any row's key starts with `<namespace>/`.

use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::Store;
use super::connection::SqliteStore;
use crate::Error;
use crate::key::CacheKey;

impl SqliteStore {
    /// Number of stored documents.
    pub async fn count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<u8>, Error> {
                let result = conn.query_row("SELECT body FROM documents WHERE key = ?1", params![&key], |row| row.get(0));

                match result {
                    Ok(body) => Ok(body),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::NotFound(key)),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn write(&self, key: &CacheKey, data: Vec<u8>) -> Result<(), Error> {
        let key = key.to_string();
        let stored_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO documents (key, body, stored_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![key, data, stored_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let found: bool = conn
                    .query_row("SELECT EXISTS(SELECT 1 FROM documents WHERE key = ?1)", params![key], |row| {
                        row.get(0)
                    })
                    .map_err(Error::from)?;
                Ok(found)
            })
            .await
            .map_err(Error::from)
    }

    async fn namespace_exists(&self, namespace: &CacheKey) -> Result<bool, Error> {
        let prefix = format!("{namespace}/");
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let found: bool = conn
                    .query_row(
                        "SELECT EXISTS(
                        SELECT 1 FROM documents
                        WHERE substr(key, 1, length(?1)) = ?1
                    )",
                        params![prefix],
                        |row| row.get(0),
                    )
                    .map_err(Error::from)?;
                Ok(found)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use serde_json::{Value, json};

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.write(&key("users/u1"), b"{\"a\":1}".to_vec()).await.unwrap();

        assert_eq!(store.read(&key("users/u1")).await.unwrap(), b"{\"a\":1}");
        assert!(store.exists(&key("users/u1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let result = store.read(&key("users/none")).await;
        assert!(matches!(result, Err(Error::NotFound(k)) if k == "users/none"));
        assert!(!store.exists(&key("users/none")).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_body() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.write(&key("graph"), b"1".to_vec()).await.unwrap();
        store.write(&key("graph"), b"2".to_vec()).await.unwrap();

        assert_eq!(store.read(&key("graph")).await.unwrap(), b"2");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_namespace_exists() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.write(&key("solves/ab_c/0"), b"{}".to_vec()).await.unwrap();

        assert!(store.namespace_exists(&key("solves/ab_c")).await.unwrap());
        assert!(!store.namespace_exists(&key("solves/ab")).await.unwrap());
        assert!(!store.namespace_exists(&key("solves/abxc")).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_over_sqlite() {
        let cache = Cache::new(SqliteStore::open_in_memory().await.unwrap());
        let value: Value = cache
            .load_or_fetch(&key("client-config"), || async { Ok(json!({"data": {"divisions": {}}})) })
            .await
            .unwrap();
        assert!(value["data"]["divisions"].is_object());
        assert!(cache.exists(&key("client-config")).await.unwrap());
    }
}
