//! Local path derivation for challenge attachments.
//!
//! rCTF upload URLs carry the object name in a `key` query parameter
//! (e.g. `https://cdn.example.com/uploads?key=3f9c%2Fchall.tar.gz`).
//!
//! The key is percent-decoded and placed beneath [`UPLOADS_DIR`], so the
//! example lands at `uploads/3f9c/chall.tar.gz`, and that relative path is
//! also what the rewritten listing records. The raw, still-encoded text after
//! `key=` is never used as a path.

/// Directory, relative to the data root, holding downloaded attachments.
pub const UPLOADS_DIR: &str = "uploads";

/// Error type for attachment path derivation failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("missing `key` query parameter")]
    MissingKey,

    #[error("unsafe attachment key: {0}")]
    UnsafeKey(String),
}

/// Derive the local relative path (`/`-separated) for an attachment URL.
///
/// Rules:
/// 1. Parse the URL and take the percent-decoded `key` query value
/// 2. Reject empty, `.` or `..` components, backslashes and NUL bytes
/// 3. Prefix with [`UPLOADS_DIR`]
pub fn attachment_path(url: &str) -> Result<String, UrlError> {
    let parsed = url::Url::parse(url.trim()).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    let key = parsed
        .query_pairs()
        .find(|(name, _)| name == "key")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or(UrlError::MissingKey)?;

    let unsafe_component = key
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == ".." || part.contains(['\\', '\0']));
    if unsafe_component {
        return Err(UrlError::UnsafeKey(key));
    }

    Ok(format!("{UPLOADS_DIR}/{key}"))
}
