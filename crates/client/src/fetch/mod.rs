//! Streaming attachment downloads.
//!
//! ### Idempotence
//! - A destination that already exists is never re-downloaded (existence,
//!   not content, decides).
//!
//! ### Streaming & Publication
//! - The body is copied chunk by chunk, so memory use does not grow with
//!   file size.
//! - Bytes go to a hidden temporary sibling which is synced and renamed into
//!   place; a failed transfer leaves nothing at the destination.
//!
//! ### Timeouts
//! - Downloads use their own client with connect and idle-read timeouts but
//!   no overall deadline: a transfer fails only when the peer stops sending.

pub mod url;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use rctf_mirror_core::Error;
use rctf_mirror_core::cache::fs::temp_sibling;

pub use url::{UPLOADS_DIR, UrlError, attachment_path};

use crate::api::{ApiConfig, transport_error};

/// HTTP client for attachment transfers.
///
/// `idle_timeout` bounds connecting and each wait for the next body bytes;
/// the total transfer time is unbounded.
pub fn download_client(user_agent: &str, idle_timeout: Duration) -> Result<Client, Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(idle_timeout)
        .read_timeout(idle_timeout)
        .use_rustls_tls()
        .build()
        .map_err(|e| Error::Transport(format!("failed to build download client: {e}")))
}

/// Result of a single attachment fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was transferred; carries the byte count.
    Downloaded(u64),
    /// The destination already existed.
    Skipped,
}

/// Downloads attachments beneath a data root.
#[derive(Debug, Clone)]
pub struct AttachmentFetcher {
    http: Client,
    root: PathBuf,
    downloads: Arc<AtomicU64>,
}

impl AttachmentFetcher {
    pub fn new(http: Client, root: impl Into<PathBuf>) -> Self {
        Self { http, root: root.into(), downloads: Arc::new(AtomicU64::new(0)) }
    }

    /// Fetcher with a [`download_client`] sharing the API's user agent and
    /// using its timeout as the idle bound. No bearer token is attached.
    pub fn from_api_config(config: &ApiConfig, root: impl Into<PathBuf>) -> Result<Self, Error> {
        Ok(Self::new(download_client(&config.user_agent, config.timeout)?, root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of completed transfers (skips excluded).
    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    /// Absolute location of a `/`-separated path relative to the root.
    pub fn local_path(&self, relative: &str) -> PathBuf {
        relative.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Stream `remote_url` to `relative` beneath the root unless it is already there.
    pub async fn fetch(&self, remote_url: &str, relative: &str) -> Result<FetchOutcome, Error> {
        let path = self.local_path(relative);
        if fs::try_exists(&path).await? {
            tracing::debug!(path = %path.display(), "attachment present, skipping");
            return Ok(FetchOutcome::Skipped);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        tracing::info!("Downloading {} to {}", remote_url, relative);
        let start = Instant::now();

        let mut response = self
            .http
            .get(remote_url)
            .send()
            .await
            .map_err(|e| transport_error(remote_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("{remote_url}: status {}", status.as_u16())));
        }

        let temp_path = temp_sibling(&path);
        let written = match stream_to_file(&mut response, &temp_path, remote_url).await {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        self.downloads.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("downloaded {} in {:?} ({} bytes)", relative, start.elapsed(), written);
        Ok(FetchOutcome::Downloaded(written))
    }
}

async fn stream_to_file(response: &mut reqwest::Response, path: &Path, remote_url: &str) -> Result<u64, Error> {
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(remote_url, e))? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
