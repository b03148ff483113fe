//! Core types and shared functionality for rctf-mirror.
//!
//! This crate provides:
//! - Key-addressed artifact cache with filesystem, SQLite and in-memory backends
//! - Offset/limit paginator that persists every page
//! - Remote record types
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod model;
pub mod paginate;

pub use cache::{Cache, FsStore, MemoryStore, SqliteStore, Store};
pub use config::{AppConfig, ConfigError, StoreBackend};
pub use error::Error;
pub use key::CacheKey;
pub use paginate::{Page, PageLayout, PageOptions, paginate};

/// Open the document cache selected by `config.store`.
pub async fn open_cache(config: &AppConfig) -> Result<Cache, Error> {
    match config.store {
        StoreBackend::Fs => {
            let root = config.json_dir();
            tracing::info!(root = %root.display(), "using filesystem store");
            Ok(Cache::new(FsStore::new(root)))
        }
        StoreBackend::Sqlite => {
            let path = config.sqlite_path();
            tracing::info!(path = %path.display(), "using sqlite store");
            Ok(Cache::new(SqliteStore::open(path).await?))
        }
    }
}
