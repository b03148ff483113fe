//! Key-addressed artifact cache.
//!
//! Byte-level persistence sits behind the [`Store`] trait so the harvest can
//! run against any of:
//!
//! - [`FsStore`]: one JSON file per key (production default)
//! - [`SqliteStore`]: a single SQLite database, with automatic schema migrations
//! - [`MemoryStore`]: an in-process map for tests
//!
//! [`Cache`] layers typed JSON (de)serialization and the load-or-fetch
//! primitive on top. Existence in the store is the only record of
//! "already fetched".

pub mod connection;
pub mod documents;
pub mod fs;
pub mod memory;
pub mod migrations;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::key::CacheKey;

pub use connection::SqliteStore;
pub use fs::FsStore;
pub use memory::MemoryStore;

/// Raw byte storage addressed by [`CacheKey`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the artifact at `key`, failing with [`Error::NotFound`] if absent.
    async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, Error>;

    /// Write `data` at `key`, replacing any previous artifact.
    async fn write(&self, key: &CacheKey, data: Vec<u8>) -> Result<(), Error>;

    /// Whether an artifact exists at exactly `key`.
    async fn exists(&self, key: &CacheKey) -> Result<bool, Error>;

    /// Whether any artifact exists beneath `namespace`.
    async fn namespace_exists(&self, namespace: &CacheKey) -> Result<bool, Error>;
}

/// Typed JSON view over a [`Store`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl Cache {
    pub fn new(store: impl Store + 'static) -> Self {
        Self { store: Arc::new(store) }
    }

    pub fn from_arc(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Serialize `value` as compact JSON and persist it under `key`.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<(), Error> {
        let data = serde_json::to_vec(value).map_err(|e| Error::Encode(format!("{key}: {e}")))?;
        self.store.write(key, data).await?;
        tracing::debug!(%key, "saved");
        Ok(())
    }

    /// Load and decode the artifact at `key`.
    pub async fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T, Error> {
        let data = self.store.read(key).await?;
        serde_json::from_slice(&data).map_err(|e| Error::MalformedResponse(format!("{key}: {e}")))
    }

    pub async fn exists(&self, key: &CacheKey) -> Result<bool, Error> {
        self.store.exists(key).await
    }

    pub async fn namespace_exists(&self, namespace: &CacheKey) -> Result<bool, Error> {
        self.store.namespace_exists(namespace).await
    }

    /// Return the cached value at `key`, or run `fetch`, persist its result
    /// and return it.
    ///
    /// `fetch` is never invoked when the key already exists, so a repeated
    /// run over an unchanged cache makes no remote calls.
    pub async fn load_or_fetch<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if self.exists(key).await? {
            tracing::debug!(%key, "cache hit");
            return self.load(key).await;
        }

        let value = fetch().await?;
        self.save(key, &value).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let cache = Cache::new(MemoryStore::new());
        cache.save(&key("users/u1"), &json!({"name": "alice"})).await.unwrap();

        let loaded: Value = cache.load(&key("users/u1")).await.unwrap();
        assert_eq!(loaded["name"], "alice");
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let cache = Cache::new(MemoryStore::new());
        let result = cache.load::<Value>(&key("users/missing")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_malformed_artifact() {
        let store = MemoryStore::new();
        store.write(&key("users/bad"), b"{not json".to_vec()).await.unwrap();
        let cache = Cache::new(store);

        let result = cache.load::<Value>(&key("users/bad")).await;
        assert!(matches!(result, Err(Error::MalformedResponse(msg)) if msg.contains("users/bad")));
    }

    #[tokio::test]
    async fn test_load_or_fetch_calls_fetch_once() {
        let cache = Cache::new(MemoryStore::new());
        let calls = AtomicUsize::new(0);
        let k = key("users/u1");

        for _ in 0..3 {
            let value: Value = cache
                .load_or_fetch(&k, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"id": "u1"}))
                })
                .await
                .unwrap();
            assert_eq!(value["id"], "u1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_or_fetch_error_persists_nothing() {
        let cache = Cache::new(MemoryStore::new());
        let k = key("users/u1");

        let result: Result<Value, Error> =
            cache.load_or_fetch(&k, || async { Err(Error::Transport("connection reset".into())) }).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!cache.exists(&k).await.unwrap());
    }
}
