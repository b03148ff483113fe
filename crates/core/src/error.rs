//! Unified error types for rctf-mirror.
//!
//! Every variant renders with a stable upper-case code prefix so operators
//! can grep logs for a failure class.

use tokio_rusqlite::rusqlite;

/// Unified error type for the harvest engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., a zero page limit).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or is unusable.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A cache key failed validation.
    #[error("INVALID_KEY: {0}")]
    InvalidKey(String),

    /// No cached artifact exists under the given key.
    #[error("CACHE_MISS: {0}")]
    NotFound(String),

    /// Filesystem operation failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A remote payload or a persisted artifact could not be decoded.
    #[error("MALFORMED_RESPONSE: {0}")]
    MalformedResponse(String),

    /// A value could not be serialized for persistence.
    #[error("ENCODE_FAILED: {0}")]
    Encode(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Network failure before or while reading a response.
    #[error("TRANSPORT_ERROR: {0}")]
    Transport(String),

    /// Request timed out.
    #[error("FETCH_TIMEOUT: {0}")]
    Timeout(String),

    /// Non-success HTTP status.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// The API rejected the bearer token.
    #[error("AUTH_ERROR: {0}")]
    AuthError(String),

    /// A concurrent branch panicked or was cancelled.
    #[error("TASK_FAILED: {0}")]
    TaskFailed(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl Error {
    /// Whether this error means "nothing is cached under that key".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
