//! rCTF API client.
//!
//! Thin typed wrapper over the endpoints the harvest reads:
//!
//! - `GET challs`
//! - `GET challs/{id}/solves?limit&offset`
//! - `GET leaderboard/now?limit&offset[&division]`
//! - `GET leaderboard/graph?limit[&division]`
//! - `GET users/{id}`
//! - `GET integrations/client/config`
//!
//! Paths resolve beneath the configured base URL. Every request carries
//! `Authorization: Bearer <token>` when a token is configured. There is no
//! retry: a failed request is returned to the caller as-is.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use url::Url;

use rctf_mirror_core::model::{
    ChallengeListing, ClientConfigResponse, GraphResponse, LeaderboardResponse, SolvesResponse, UserProfile,
};
use rctf_mirror_core::{AppConfig, ConfigError, Error};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "rctf-mirror/0.1";

/// API client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL ending in `/`, e.g. `https://ctf.example.com/api/v1/`.
    pub base_url: Url,
    /// Bearer token from RCTF_TOKEN.
    pub token: Option<String>,
    /// Request timeout (default: 60s).
    pub timeout: Duration,
    /// User-agent string (default: rctf-mirror/0.1).
    pub user_agent: String,
}

impl ApiConfig {
    pub fn new(base_url: Url) -> Self {
        Self { base_url, token: None, timeout: DEFAULT_TIMEOUT, user_agent: DEFAULT_USER_AGENT.to_string() }
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        Self { token: Some(token.into()), ..self }
    }

    /// Build from the loaded application configuration.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.require_api()?,
            token: config.token.clone(),
            timeout: config.timeout(),
            user_agent: config.user_agent.clone(),
        })
    }
}

/// Map a reqwest failure to the transport side of the error taxonomy.
pub(crate) fn transport_error(context: impl Display, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{context}: {err}"))
    } else {
        Error::Transport(format!("{context}: {err}"))
    }
}

/// rCTF API client.
///
/// Cheap to clone; clones share the connection pool and request counter.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    config: ApiConfig,
    requests: Arc<AtomicU64>,
}

impl ApiClient {
    /// Create a new API client with the given configuration.
    pub fn new(config: ApiConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config, requests: Arc::new(AtomicU64::new(0)) })
    }

    /// Create a client from the loaded application configuration.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(ApiConfig::from_app_config(config)?)
    }

    /// The underlying HTTP client (carries the total request timeout).
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Number of API requests sent so far by this client and its clones.
    pub fn requests_issued(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Resolve path segments beneath the base URL, escaping each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(format!("{} cannot be a base URL", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, String)]) -> Result<T, Error> {
        let url = self.endpoint(segments)?;
        let start = Instant::now();

        let mut request = self.http.get(url.clone()).header(header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = request.send().await.map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        tracing::debug!(%url, ?query, status = status.as_u16(), "API response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::AuthError(format!("{url}: status {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(Error::HttpError(format!("{url}: status {}", status.as_u16())));
        }

        let bytes = response.bytes().await.map_err(|e| transport_error(&url, e))?;
        let value = serde_json::from_slice(&bytes).map_err(|e| Error::MalformedResponse(format!("{url}: {e}")))?;

        tracing::debug!("fetched {} in {:?} ({} bytes)", url, start.elapsed(), bytes.len());
        Ok(value)
    }

    /// `GET challs`
    pub async fn challenges(&self) -> Result<ChallengeListing, Error> {
        self.get_json(&["challs"], &[]).await
    }

    /// `GET challs/{id}/solves?limit&offset`
    pub async fn solves(&self, challenge_id: &str, limit: u64, offset: u64) -> Result<SolvesResponse, Error> {
        let query = [("limit", limit.to_string()), ("offset", offset.to_string())];
        self.get_json(&["challs", challenge_id, "solves"], &query).await
    }

    /// `GET leaderboard/now?limit&offset[&division]`; `None` is the global board.
    pub async fn leaderboard_now(
        &self, division: Option<&str>, limit: u64, offset: u64,
    ) -> Result<LeaderboardResponse, Error> {
        let mut query = vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(division) = division {
            query.push(("division", division.to_string()));
        }
        self.get_json(&["leaderboard", "now"], &query).await
    }

    /// `GET leaderboard/graph?limit[&division]`
    pub async fn leaderboard_graph(&self, division: Option<&str>, limit: u64) -> Result<GraphResponse, Error> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(division) = division {
            query.push(("division", division.to_string()));
        }
        self.get_json(&["leaderboard", "graph"], &query).await
    }

    /// `GET users/{id}`
    pub async fn user(&self, id: &str) -> Result<UserProfile, Error> {
        self.get_json(&["users", id], &[]).await
    }

    /// `GET integrations/client/config`
    pub async fn client_config(&self) -> Result<ClientConfigResponse, Error> {
        self.get_json(&["integrations", "client", "config"], &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ApiClient {
        let base = Url::parse(&format!("{}/api/v1/", server.uri())).unwrap();
        ApiClient::new(ApiConfig::new(base).with_token("secret")).unwrap()
    }

    #[test]
    fn test_from_app_config_requires_api() {
        let config = AppConfig::default();
        assert!(matches!(ApiClient::from_app_config(&config), Err(Error::Config(ConfigError::Missing { .. }))));
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = ApiClient::new(ApiConfig::new(Url::parse("https://ctf.example.com/api/v1/").unwrap())).unwrap();
        let url = client.endpoint(&["challs", "a b?c", "solves"]).unwrap();
        assert_eq!(url.as_str(), "https://ctf.example.com/api/v1/challs/a%20b%3Fc/solves");
    }

    #[tokio::test]
    async fn test_sends_bearer_token_and_counts_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/challs"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "kind": "goodChallenges", "data": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let listing = client.challenges().await.unwrap();
        assert!(listing.data.is_empty());
        assert_eq!(client.requests_issued(), 1);
    }

    #[tokio::test]
    async fn test_leaderboard_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/leaderboard/now"))
            .and(query_param("limit", "100"))
            .and(query_param("offset", "200"))
            .and(query_param("division", "open"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "total": 201, "leaderboard": [] } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let page = client.leaderboard_now(Some("open"), 100, 200).await.unwrap();
        assert_eq!(page.data.total, 201);
    }

    #[tokio::test]
    async fn test_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/u1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(matches!(client.user("u1").await, Err(Error::AuthError(_))));
    }

    #[tokio::test]
    async fn test_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/integrations/client/config"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.client_config().await;
        assert!(matches!(result, Err(Error::HttpError(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/challs/c1/solves"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "solves": [] } })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(matches!(client.solves("c1", 10, 0).await, Err(Error::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_transport_error() {
        let client = ApiClient::new(ApiConfig::new(Url::parse("http://127.0.0.1:1/").unwrap())).unwrap();
        assert!(matches!(client.challenges().await, Err(Error::Transport(_))));
    }
}
