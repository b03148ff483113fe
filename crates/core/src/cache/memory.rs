//! In-memory store for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Store;
use crate::Error;
use crate::key::CacheKey;

/// Ordered in-process map of key -> bytes.
///
/// Clones share the same map, so a test can keep a handle for inspection
/// after moving a copy into a [`Cache`](super::Cache).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys in order.
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Number of stored artifacts.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, Error> {
        self.entries
            .read()
            .await
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn write(&self, key: &CacheKey, data: Vec<u8>) -> Result<(), Error> {
        self.entries.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool, Error> {
        Ok(self.entries.read().await.contains_key(key.as_str()))
    }

    async fn namespace_exists(&self, namespace: &CacheKey) -> Result<bool, Error> {
        let prefix = format!("{namespace}/");
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix)))
    }
}
