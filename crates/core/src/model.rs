//! Remote record types.
//!
//! Only the fields the harvest depends on are modeled; everything else is
//! kept in `extra` maps so persisted documents round-trip what the server sent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response envelope shared by every API endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<T> Envelope<T> {
    /// Wrap bare data, as tests and fixtures need.
    pub fn new(data: T) -> Self {
        Self { kind: None, message: None, data, extra: Map::new() }
    }
}

/// A file attached to a challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeFile {
    /// Remote download URL, or the local relative path once the archive
    /// holds a copy.
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    /// Declared solve count; the initial upper bound for solves pagination.
    #[serde(default)]
    pub solves: u64,
    #[serde(default)]
    pub files: Vec<ChallengeFile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type ChallengeListing = Envelope<Vec<Challenge>>;

impl ChallengeListing {
    /// Every attachment URL in listing order, duplicates included.
    pub fn file_urls(&self) -> impl Iterator<Item = &str> {
        self.data
            .iter()
            .flat_map(|chall| chall.files.iter().map(|f| f.url.as_str()))
    }

    /// Replace attachment URLs using `local_paths` (remote URL -> local path).
    ///
    /// Consumes the fetched listing and returns the rewritten one. URLs with
    /// no entry are left untouched.
    pub fn with_local_files(mut self, local_paths: &HashMap<String, String>) -> Self {
        for file in self.data.iter_mut().flat_map(|chall| chall.files.iter_mut()) {
            if let Some(local) = local_paths.get(&file.url) {
                file.url = local.clone();
            }
        }
        self
    }
}

/// One page of `challs/{id}/solves`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvesPage {
    pub total: u64,
    #[serde(default)]
    pub solves: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of `leaderboard/now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub total: u64,
    #[serde(default)]
    pub leaderboard: Vec<LeaderboardEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of `integrations/client/config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub divisions: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientConfig {
    /// Division names in key order.
    pub fn division_names(&self) -> Vec<String> {
        self.divisions.keys().cloned().collect()
    }
}

pub type SolvesResponse = Envelope<SolvesPage>;
pub type LeaderboardResponse = Envelope<LeaderboardPage>;
pub type ClientConfigResponse = Envelope<ClientConfig>;

/// Opaque payloads persisted exactly as received.
pub type GraphResponse = Value;
pub type UserProfile = Value;

/// A response that is one slice of a paginated collection.
pub trait Paged {
    /// Authoritative size of the whole collection, as reported by this page.
    fn total(&self) -> u64;
}

impl Paged for SolvesResponse {
    fn total(&self) -> u64 {
        self.data.total
    }
}

impl Paged for LeaderboardResponse {
    fn total(&self) -> u64 {
        self.data.total
    }
}
