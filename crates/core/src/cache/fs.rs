//! Filesystem-backed store.
//!
//! Key `a/b/c` lives at `<root>/a/b/c.json`; namespace `a/b` is the
//! directory `<root>/a/b`. Writes land in a uniquely named temporary sibling
//! which is synced and then renamed over the destination, so a crash never
//! leaves a half-written document at a key's path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::Store;
use crate::Error;
use crate::key::CacheKey;

const EXTENSION: &str = ".json";

/// One JSON file per key beneath a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_path(&self, key: &CacheKey) -> PathBuf {
        key.segments().fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Filesystem path of the document stored under `key`.
    pub fn key_path(&self, key: &CacheKey) -> PathBuf {
        let mut path = self.namespace_path(key);
        let file_name = path
            .file_name()
            .map(|name| format!("{}{EXTENSION}", name.to_string_lossy()))
            .unwrap_or_else(|| EXTENSION.to_string());
        path.set_file_name(file_name);
        path
    }
}

/// Write `data` to `path` through a synced temporary file and a rename.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_sibling(path);
    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

/// A unique hidden sibling of `path` for staging writes.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp.{}", Uuid::new_v4()))
}

#[async_trait]
impl Store for FsStore {
    async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, Error> {
        let path = self.key_path(key);
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound { Error::NotFound(key.to_string()) } else { Error::Io(e) }
        })
    }

    async fn write(&self, key: &CacheKey, data: Vec<u8>) -> Result<(), Error> {
        write_atomic(&self.key_path(key), &data).await
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool, Error> {
        Ok(fs::try_exists(self.key_path(key)).await?)
    }

    async fn namespace_exists(&self, namespace: &CacheKey) -> Result<bool, Error> {
        let path = self.namespace_path(namespace);
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory) => {
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        // Hidden entries are staging files; an empty directory can be left
        // behind by a failed first write.
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_name().to_string_lossy().starts_with('.') {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
