//! Remote side of rctf-mirror.
//!
//! This crate provides the rCTF API client, streaming attachment downloads
//! and the harvest orchestrator that persists everything through the core
//! cache.

pub mod api;
pub mod fetch;
pub mod harvest;

pub use api::{ApiClient, ApiConfig};
pub use fetch::{AttachmentFetcher, FetchOutcome, UPLOADS_DIR, UrlError, attachment_path};
pub use harvest::{Division, HarvestOptions, HarvestReport, Harvester};
