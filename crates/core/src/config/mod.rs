//! Harvest settings.
//!
//! Values come from `RCTF_*` environment variables, then an optional TOML
//! file named by `RCTF_CONFIG_FILE`, then the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

/// Which backend persists JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One `.json` file per key under `<data_dir>/json`.
    #[default]
    Fs,
    /// A single SQLite database file.
    Sqlite,
}

/// Everything a harvest run needs to know: where the API is, where the
/// archive goes, and how hard to hit the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the rCTF API, e.g. `https://ctf.example.com/api/v1/`.
    ///
    /// Set via RCTF_API environment variable.
    /// Required only when a harvest is started.
    #[serde(default)]
    pub api: Option<String>,

    /// Bearer token sent with every API request.
    ///
    /// Set via RCTF_TOKEN environment variable.
    #[serde(default)]
    pub token: Option<String>,

    /// Root directory for the archive (documents and uploads).
    ///
    /// Set via RCTF_DATA_DIR environment variable.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Document store backend: `fs` or `sqlite`.
    ///
    /// Set via RCTF_STORE environment variable.
    #[serde(default)]
    pub store: StoreBackend,

    /// SQLite database path, used when `store = "sqlite"`.
    ///
    /// Set via RCTF_DB_PATH environment variable. Defaults to
    /// `<data_dir>/archive.sqlite`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Page size for `leaderboard/now`.
    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: u64,

    /// Page size for `challs/{id}/solves`.
    #[serde(default = "default_solves_limit")]
    pub solves_limit: u64,

    /// `limit` parameter passed to `leaderboard/graph`.
    #[serde(default = "default_graph_limit")]
    pub graph_limit: u64,

    /// Maximum number of concurrent fetch branches.
    ///
    /// Set via RCTF_MAX_CONCURRENCY environment variable.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via RCTF_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via RCTF_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whether challenge attachments are downloaded and their URLs rewritten.
    ///
    /// Set via RCTF_SAVE_UPLOADS environment variable.
    #[serde(default = "default_true")]
    pub save_uploads: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./archive")
}

fn default_leaderboard_limit() -> u64 {
    100
}

fn default_solves_limit() -> u64 {
    10
}

fn default_graph_limit() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    16
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_user_agent() -> String {
    "rctf-mirror/0.1".into()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: None,
            token: None,
            data_dir: default_data_dir(),
            store: StoreBackend::default(),
            db_path: None,
            leaderboard_limit: default_leaderboard_limit(),
            solves_limit: default_solves_limit(),
            graph_limit: default_graph_limit(),
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            save_uploads: true,
        }
    }
}

impl AppConfig {
    /// Per-request HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Directory holding one JSON file per cache key (fs backend).
    pub fn json_dir(&self) -> PathBuf {
        self.data_dir.join("json")
    }

    /// Resolved SQLite database path (sqlite backend).
    pub fn sqlite_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("archive.sqlite"))
    }

    /// Merge defaults, the optional TOML file and `RCTF_*` variables (in
    /// rising precedence), then validate.
    ///
    /// `RCTF_CONFIG_FILE` and `RCTF_LOG_JSON` are read elsewhere and never
    /// land in the struct.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RCTF_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("RCTF_")
                .ignore(&["CONFIG_FILE", "LOG_JSON"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse the API base URL (for deferred validation).
    ///
    /// The returned URL always ends with `/` so endpoint paths join beneath it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API URL is not set and
    /// `ConfigError::Invalid` if it does not parse as an http(s) URL.
    pub fn require_api(&self) -> Result<Url, ConfigError> {
        let raw = self.api.as_deref().map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| {
            ConfigError::Missing { field: "api".into(), hint: "Set RCTF_API environment variable".into() }
        })?;

        let with_slash = if raw.ends_with('/') { raw.to_string() } else { format!("{raw}/") };
        let url = Url::parse(&with_slash).map_err(|e| ConfigError::Invalid { field: "api".into(), reason: e.to_string() })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::Invalid { field: "api".into(), reason: format!("unsupported scheme: {scheme}") }),
        }
    }
}
