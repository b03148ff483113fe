//! Harvest orchestration.
//!
//! A run walks six stages in strict order; fan-out happens only inside a
//! stage and always goes through the shared limiter:
//!
//! 1. challenge listing (+ attachment downloads, URL rewrite)
//! 2. solves per challenge
//! 3. global leaderboard and graph
//! 4. division names, then leaderboard and graph per division
//! 5. participant id list, extracted from the persisted global pages
//! 6. profile per participant
//!
//! Every fetch point is cache-or-fetch, so a rerun over a complete archive
//! issues no requests.

pub mod dispatch;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;

use rctf_mirror_core::key::layout;
use rctf_mirror_core::model::{
    ChallengeListing, ClientConfigResponse, GraphResponse, LeaderboardResponse, UserProfile,
};
use rctf_mirror_core::{AppConfig, Cache, Error, PageLayout, PageOptions, open_cache, paginate};

use crate::api::ApiClient;
use crate::fetch::{AttachmentFetcher, attachment_path};

pub use dispatch::dispatch;

/// Page prefix of leaderboard pages (`leaderboard/<division>/now-<offset>`).
const LEADERBOARD_PAGE_PREFIX: &str = "now-";

/// Tunables of a harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub leaderboard_limit: u64,
    pub solves_limit: u64,
    pub graph_limit: u64,
    pub max_concurrency: usize,
    /// Download attachments and rewrite their URLs to local paths.
    pub save_uploads: bool,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self { leaderboard_limit: 100, solves_limit: 10, graph_limit: 10, max_concurrency: 16, save_uploads: true }
    }
}

impl From<&AppConfig> for HarvestOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            leaderboard_limit: config.leaderboard_limit,
            solves_limit: config.solves_limit,
            graph_limit: config.graph_limit,
            max_concurrency: config.max_concurrency,
            save_uploads: config.save_uploads,
        }
    }
}

/// Leaderboard scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Division {
    /// The global board, stored under `leaderboard/all`.
    All,
    Named(String),
}

impl Division {
    pub fn key_segment(&self) -> &str {
        match self {
            Division::All => "all",
            Division::Named(name) => name,
        }
    }

    /// Value of the `division` query parameter; `None` for the global board.
    pub fn query(&self) -> Option<&str> {
        match self {
            Division::All => None,
            Division::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_segment())
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub challenges: usize,
    pub divisions: usize,
    pub participants: usize,
    /// API requests issued during the run.
    pub requests: u64,
    /// Attachments transferred during the run.
    pub downloads: u64,
}

/// Drives a harvest against one API and one archive.
#[derive(Debug, Clone)]
pub struct Harvester {
    api: ApiClient,
    cache: Cache,
    attachments: AttachmentFetcher,
    options: HarvestOptions,
    limiter: Arc<Semaphore>,
}

impl Harvester {
    pub fn new(
        api: ApiClient, cache: Cache, attachments: AttachmentFetcher, options: HarvestOptions,
    ) -> Result<Self, Error> {
        if options.max_concurrency == 0 {
            return Err(Error::InvalidInput("max_concurrency must be at least 1".into()));
        }
        let limiter = Arc::new(Semaphore::new(options.max_concurrency));
        Ok(Self { api, cache, attachments, options, limiter })
    }

    /// Wire up client, cache backend and attachment root from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let api = ApiClient::from_app_config(config)?;
        let cache = open_cache(config).await?;
        let attachments = AttachmentFetcher::from_api_config(api.config(), config.data_dir.clone())?;
        Self::new(api, cache, attachments, HarvestOptions::from(config))
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Run every stage in order, stopping at the first error.
    pub async fn run(&self) -> Result<HarvestReport, Error> {
        let requests_before = self.api.requests_issued();
        let downloads_before = self.attachments.downloads();

        let listing = self.challenges().await?;
        tracing::info!(challenges = listing.data.len(), "challenge listing ready");

        let solves = listing.data.iter().map(|chall| {
            let this = self.clone();
            let id = chall.id.clone();
            let declared = chall.solves;
            async move { this.solves(&id, declared).await }
        });
        dispatch(&self.limiter, "solves", solves).await?;
        tracing::info!("solves harvested");

        self.leaderboard(&Division::All).await?;
        tracing::info!("global leaderboard harvested");

        let divisions = self.divisions().await?;
        let boards = divisions.iter().map(|name| {
            let this = self.clone();
            let division = Division::Named(name.clone());
            async move { this.leaderboard(&division).await }
        });
        dispatch(&self.limiter, "divisions", boards).await?;
        tracing::info!(divisions = divisions.len(), "division leaderboards harvested");

        let ids = self.participant_ids().await?;
        tracing::info!(participants = ids.len(), "participant ids ready");

        let profiles = ids.iter().map(|id| {
            let this = self.clone();
            let id = id.clone();
            async move { this.user(&id).await }
        });
        dispatch(&self.limiter, "users", profiles).await?;
        tracing::info!("profiles harvested");

        Ok(HarvestReport {
            challenges: listing.data.len(),
            divisions: divisions.len(),
            participants: ids.len(),
            requests: self.api.requests_issued() - requests_before,
            downloads: self.attachments.downloads() - downloads_before,
        })
    }

    /// Stage 1: the challenge listing, with attachments localized when fetched fresh.
    pub async fn challenges(&self) -> Result<ChallengeListing, Error> {
        self.cache
            .load_or_fetch(&layout::challenges_listing(), || async {
                let listing = self.api.challenges().await?;
                if !self.options.save_uploads {
                    return Ok(listing);
                }
                self.localize_attachments(listing).await
            })
            .await
    }

    /// Download every attachment of `listing` and return it with local file URLs.
    async fn localize_attachments(&self, listing: ChallengeListing) -> Result<ChallengeListing, Error> {
        let mut local_paths: HashMap<String, String> = HashMap::new();
        let mut claimed = HashSet::new();
        let mut downloads = Vec::new();

        for url in listing.file_urls() {
            if local_paths.contains_key(url) {
                continue;
            }
            let relative = attachment_path(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
            if claimed.insert(relative.clone()) {
                downloads.push((url.to_string(), relative.clone()));
            }
            local_paths.insert(url.to_string(), relative);
        }

        tracing::info!(attachments = downloads.len(), "fetching attachments");
        let fetches = downloads.into_iter().map(|(url, relative)| {
            let fetcher = self.attachments.clone();
            async move { fetcher.fetch(&url, &relative).await }
        });
        dispatch(&self.limiter, "attachments", fetches).await?;

        Ok(listing.with_local_files(&local_paths))
    }

    /// Stage 2 branch: every solves page of one challenge, unless any is persisted.
    pub async fn solves(&self, challenge_id: &str, declared: u64) -> Result<usize, Error> {
        let collection = layout::solves(challenge_id)?;
        if self.cache.namespace_exists(&collection).await? {
            tracing::debug!(%collection, "solves already harvested");
            return Ok(0);
        }

        let api = &self.api;
        let options = PageOptions::new(self.options.solves_limit).with_total_hint(declared);
        let pages = paginate(&self.cache, &PageLayout::new(collection, ""), options, move |limit, offset| {
            api.solves(challenge_id, limit, offset)
        })
        .await?;
        Ok(pages.len())
    }

    /// Stages 3 and 4: one division's pages, then its graph.
    ///
    /// Pages are written before the graph, so a present namespace means the
    /// pages were walked.
    pub async fn leaderboard(&self, division: &Division) -> Result<(), Error> {
        let collection = layout::leaderboard(division.key_segment())?;
        let api = &self.api;
        let query = division.query();

        if self.cache.namespace_exists(&collection).await? {
            tracing::debug!(%collection, "leaderboard pages already harvested");
        } else {
            let options = PageOptions::new(self.options.leaderboard_limit).with_total_hint(1);
            let layout = PageLayout::new(collection, LEADERBOARD_PAGE_PREFIX);
            let pages = paginate(&self.cache, &layout, options, move |limit, offset| {
                api.leaderboard_now(query, limit, offset)
            })
            .await?;
            tracing::debug!(%division, pages = pages.len(), "leaderboard pages saved");
        }

        let graph_limit = self.options.graph_limit;
        let graph_key = layout::leaderboard_graph(division.key_segment())?;
        self.cache
            .load_or_fetch::<GraphResponse, _, _>(&graph_key, || api.leaderboard_graph(query, graph_limit))
            .await?;
        Ok(())
    }

    /// Stage 4: division names from the client configuration.
    pub async fn divisions(&self) -> Result<Vec<String>, Error> {
        let config: ClientConfigResponse =
            self.cache.load_or_fetch(&layout::client_config(), || self.api.client_config()).await?;
        Ok(config.data.division_names())
    }

    /// Stage 5: the persisted participant id list, built on first use.
    pub async fn participant_ids(&self) -> Result<Vec<String>, Error> {
        self.cache
            .load_or_fetch(&layout::participant_id_list(), || self.collect_participant_ids())
            .await
    }

    /// Scan `leaderboard/all/now-0`, `now-<limit>`, ... until a page is
    /// missing, keeping each id once in first-seen order.
    async fn collect_participant_ids(&self) -> Result<Vec<String>, Error> {
        let limit = self.options.leaderboard_limit;
        if limit == 0 {
            return Err(Error::InvalidInput("leaderboard page limit must be greater than 0".into()));
        }

        let pages = PageLayout::new(layout::leaderboard(Division::All.key_segment())?, LEADERBOARD_PAGE_PREFIX);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut offset = 0u64;

        loop {
            let key = pages.page_key(offset)?;
            if !self.cache.exists(&key).await? {
                break;
            }
            let page: LeaderboardResponse = self.cache.load(&key).await?;
            for entry in page.data.leaderboard {
                if seen.insert(entry.id.clone()) {
                    ids.push(entry.id);
                }
            }
            offset = match offset.checked_add(limit) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(ids)
    }

    /// Stage 6 branch: one profile.
    pub async fn user(&self, id: &str) -> Result<(), Error> {
        self.cache
            .load_or_fetch::<UserProfile, _, _>(&layout::user(id)?, || self.api.user(id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rctf_mirror_core::model::{Envelope, LeaderboardEntry, LeaderboardPage};
    use rctf_mirror_core::{CacheKey, MemoryStore, Store};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::ApiConfig;

    /// Memory store that records how often each key is written.
    #[derive(Clone, Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: Arc<Mutex<HashMap<String, usize>>>,
    }

    impl CountingStore {
        fn writes_to(&self, key: &str) -> usize {
            self.writes.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, Error> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &CacheKey, data: Vec<u8>) -> Result<(), Error> {
            *self.writes.lock().unwrap().entry(key.to_string()).or_default() += 1;
            self.inner.write(key, data).await
        }

        async fn exists(&self, key: &CacheKey) -> Result<bool, Error> {
            self.inner.exists(key).await
        }

        async fn namespace_exists(&self, namespace: &CacheKey) -> Result<bool, Error> {
            self.inner.namespace_exists(namespace).await
        }
    }

    fn harvester_over(server: &MockServer, cache: Cache, dir: &TempDir, options: HarvestOptions) -> Harvester {
        let base = Url::parse(&format!("{}/api/", server.uri())).unwrap();
        let api = ApiClient::new(ApiConfig::new(base)).unwrap();
        let attachments = AttachmentFetcher::new(api.http().clone(), dir.path());
        Harvester::new(api, cache, attachments, options).unwrap()
    }

    fn harvester(server: &MockServer, store: MemoryStore, dir: &TempDir, options: HarvestOptions) -> Harvester {
        harvester_over(server, Cache::new(store), dir, options)
    }

    fn board(total: u64, ids: &[&str]) -> LeaderboardResponse {
        let leaderboard = ids
            .iter()
            .map(|id| LeaderboardEntry { id: id.to_string(), extra: Map::new() })
            .collect();
        Envelope::new(LeaderboardPage { total, leaderboard, extra: Map::new() })
    }

    #[test]
    fn test_division_segments() {
        assert_eq!(Division::All.key_segment(), "all");
        assert_eq!(Division::All.query(), None);
        let open = Division::Named("open".into());
        assert_eq!(open.key_segment(), "open");
        assert_eq!(open.query(), Some("open"));
        assert_eq!(open.to_string(), "open");
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let api = ApiClient::new(ApiConfig::new(base)).unwrap();
        let attachments = AttachmentFetcher::new(api.http().clone(), dir.path());
        let options = HarvestOptions { max_concurrency: 0, ..HarvestOptions::default() };
        let result = Harvester::new(api, Cache::new(MemoryStore::new()), attachments, options);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_participant_ids_dedup_and_stop_at_gap() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let options = HarvestOptions { leaderboard_limit: 2, ..HarvestOptions::default() };
        let harvester = harvester(&server, store.clone(), &dir, options);
        let cache = harvester.cache().clone();

        let all = |suffix: &str| CacheKey::new(format!("leaderboard/all/{suffix}")).unwrap();
        cache.save(&all("now-0"), &board(5, &["a", "b"])).await.unwrap();
        cache.save(&all("now-2"), &board(5, &["b", "c"])).await.unwrap();
        // now-4 missing: the scan stops even though a later page exists.
        cache.save(&all("now-6"), &board(5, &["z"])).await.unwrap();

        let ids = harvester.participant_ids().await.unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let persisted: Vec<String> = cache.load(&layout::participant_id_list()).await.unwrap();
        assert_eq!(persisted, ids);
    }

    #[tokio::test]
    async fn test_solves_skipped_when_namespace_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let harvester = harvester(&server, MemoryStore::new(), &dir, HarvestOptions::default());
        let key = CacheKey::new("solves/c1/0").unwrap();
        harvester.cache().save(&key, &json!({ "data": { "total": 30, "solves": [] } })).await.unwrap();

        assert_eq!(harvester.solves("c1", 30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_solves_walk_follows_reported_total() {
        let server = MockServer::start().await;
        for offset in ["0", "10", "20"] {
            Mock::given(method("GET"))
                .and(path("/api/challs/c1/solves"))
                .and(query_param("offset", offset))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({ "data": { "total": 20, "solves": [] } })),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let harvester = harvester(&server, store.clone(), &dir, HarvestOptions::default());

        // Declared count is stale; the server's total drives the walk.
        assert_eq!(harvester.solves("c1", 0).await.unwrap(), 3);
        assert_eq!(store.keys().await, vec!["solves/c1/0", "solves/c1/10", "solves/c1/20"]);
    }

    #[tokio::test]
    async fn test_listing_left_untouched_without_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/challs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "c1", "solves": 0, "files": [{ "url": "https://cdn.test/uploads?key=a/f.bin" }] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let options = HarvestOptions { save_uploads: false, ..HarvestOptions::default() };
        let harvester = harvester(&server, MemoryStore::new(), &dir, options);

        let listing = harvester.challenges().await.unwrap();
        assert_eq!(listing.data[0].files[0].url, "https://cdn.test/uploads?key=a/f.bin");
        assert!(!dir.path().join("uploads").exists());
    }

    #[tokio::test]
    async fn test_unsafe_attachment_key_fails_stage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/challs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "c1", "files": [{ "url": "https://cdn.test/uploads?key=../../escape" }] }]
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let harvester = harvester(&server, store.clone(), &dir, HarvestOptions::default());

        assert!(matches!(harvester.challenges().await, Err(Error::InvalidUrl(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_rewritten_listing_saved_once() {
        let server = MockServer::start().await;
        let shared = format!("{}/uploads?key=s%2Flib.so", server.uri());
        Mock::given(method("GET"))
            .and(path("/api/challs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "id": "c1", "solves": 0, "files": [
                        { "url": shared },
                        { "url": format!("{}/uploads?key=c1%2Fchall", server.uri()) }
                    ] },
                    { "id": "c2", "solves": 0, "files": [{ "url": shared }] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uploads"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bin".to_vec()))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = CountingStore::default();
        let harvester = harvester_over(&server, Cache::new(store.clone()), &dir, HarvestOptions::default());

        harvester.challenges().await.unwrap();
        let listing = harvester.challenges().await.unwrap();

        assert_eq!(store.writes_to("challenges-listing"), 1);
        let urls: Vec<&str> = listing.file_urls().collect();
        assert_eq!(urls, vec!["uploads/s/lib.so", "uploads/c1/chall", "uploads/s/lib.so"]);

        let persisted: Value = harvester.cache().load(&layout::challenges_listing()).await.unwrap();
        assert_eq!(persisted["data"][1]["files"][0]["url"], "uploads/s/lib.so");
    }

    #[tokio::test]
    async fn test_missing_graph_refetched_without_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/leaderboard/now"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/leaderboard/graph"))
            .and(query_param("limit", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "graph": [] } })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = CountingStore::default();
        let harvester = harvester_over(&server, Cache::new(store.clone()), &dir, HarvestOptions::default());
        let page = CacheKey::new("leaderboard/all/now-0").unwrap();
        harvester.cache().save(&page, &board(1, &["u1"])).await.unwrap();

        harvester.leaderboard(&Division::All).await.unwrap();

        assert_eq!(store.writes_to("leaderboard/all/now-0"), 1);
        assert_eq!(store.writes_to("leaderboard/all/graph"), 1);
        assert!(harvester.cache().exists(&layout::leaderboard_graph("all").unwrap()).await.unwrap());
    }
}
