//! Range checks applied to a freshly loaded [`AppConfig`].

use crate::config::AppConfig;
use thiserror::Error;

/// Upper bound for any page size.
const MAX_PAGE_LIMIT: u64 = 1000;

/// Upper bound for concurrent fetch branches.
const MAX_CONCURRENCY: usize = 256;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn check_page_limit(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_PAGE_LIMIT {
        return Err(ConfigError::Invalid {
            field: field.into(),
            reason: format!("must be between 1 and {MAX_PAGE_LIMIT}"),
        });
    }
    Ok(())
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - a page limit is 0 or exceeds 1000
    /// - `max_concurrency` is 0 or exceeds 256
    /// - `timeout_ms` is less than 100ms or exceeds 10 minutes
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_page_limit("leaderboard_limit", self.leaderboard_limit)?;
        check_page_limit("solves_limit", self.solves_limit)?;
        check_page_limit("graph_limit", self.graph_limit)?;

        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::Invalid {
                field: "max_concurrency".into(),
                reason: format!("must be between 1 and {MAX_CONCURRENCY}"),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 600_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 10 minutes (600000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.token.is_none() {
            tracing::warn!("no RCTF_TOKEN configured; requests will be sent without Authorization");
        }

        Ok(())
    }
}
