//! Path-shaped cache keys.
//!
//! A key names exactly one artifact. Keys are `/`-separated and validated on
//! construction so that ids taken from remote payloads cannot escape the
//! archive namespace.

use std::fmt;

use crate::Error;

/// A validated, `/`-separated artifact key such as `leaderboard/all/now-0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

fn validate_segment(segment: &str, whole: &str) -> Result<(), Error> {
    if segment.is_empty() {
        return Err(Error::InvalidKey(format!("empty segment in {whole:?}")));
    }
    if segment == "." || segment == ".." {
        return Err(Error::InvalidKey(format!("relative segment in {whole:?}")));
    }
    if segment.contains(['\\', '\0']) {
        return Err(Error::InvalidKey(format!("forbidden character in {whole:?}")));
    }
    Ok(())
}

impl CacheKey {
    /// Parse a `/`-separated key.
    pub fn new(key: impl Into<String>) -> Result<Self, Error> {
        let key = key.into();
        for segment in key.split('/') {
            validate_segment(segment, &key)?;
        }
        Ok(Self(key))
    }

    /// Append one segment. The segment itself may not contain `/`.
    pub fn join(&self, segment: impl AsRef<str>) -> Result<Self, Error> {
        let segment = segment.as_ref();
        let joined = format!("{}/{}", self.0, segment);
        if segment.contains('/') {
            return Err(Error::InvalidKey(format!("segment {segment:?} contains '/'")));
        }
        validate_segment(segment, &joined)?;
        Ok(Self(joined))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate the key's segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Whether `other` lives strictly inside this key's namespace.
    pub fn contains(&self, other: &CacheKey) -> bool {
        other
            .0
            .strip_prefix(&self.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Keys of the persisted archive layout.
pub mod layout {
    use super::CacheKey;
    use crate::Error;

    pub fn challenges_listing() -> CacheKey {
        CacheKey("challenges-listing".into())
    }

    pub fn client_config() -> CacheKey {
        CacheKey("client-config".into())
    }

    pub fn participant_id_list() -> CacheKey {
        CacheKey("participant-id-list".into())
    }

    /// Namespace holding every solves page of one challenge.
    pub fn solves(challenge_id: &str) -> Result<CacheKey, Error> {
        CacheKey("solves".into()).join(challenge_id)
    }

    /// Namespace holding the pages and graph of one division's leaderboard.
    pub fn leaderboard(division: &str) -> Result<CacheKey, Error> {
        CacheKey("leaderboard".into()).join(division)
    }

    pub fn leaderboard_graph(division: &str) -> Result<CacheKey, Error> {
        leaderboard(division)?.join("graph")
    }

    pub fn user(id: &str) -> Result<CacheKey, Error> {
        CacheKey("users".into()).join(id)
    }
}
