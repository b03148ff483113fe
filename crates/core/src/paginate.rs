//! Offset/limit pagination with per-page persistence.
//!
//! The loop always fetches the first page, re-reads `total` from every
//! response, and continues while `offset <= total`. When `total` is an exact
//! multiple of `limit` this fetches one trailing (usually empty) page at
//! `offset == total`; the archive layout depends on that page existing.

use std::future::Future;

use serde::Serialize;

use crate::Error;
use crate::cache::Cache;
use crate::key::CacheKey;
use crate::model::Paged;

/// Where the pages of one collection are persisted.
#[derive(Debug, Clone)]
pub struct PageLayout {
    collection: CacheKey,
    page_prefix: &'static str,
}

impl PageLayout {
    /// Pages live at `<collection>/<page_prefix><offset>`.
    pub fn new(collection: CacheKey, page_prefix: &'static str) -> Self {
        Self { collection, page_prefix }
    }

    pub fn collection(&self) -> &CacheKey {
        &self.collection
    }

    pub fn page_key(&self, offset: u64) -> Result<CacheKey, Error> {
        self.collection.join(format!("{}{offset}", self.page_prefix))
    }
}

/// Loop parameters for [`paginate`].
#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    /// Page size requested from the server.
    pub limit: u64,
    /// First offset to fetch.
    pub offset: u64,
    /// Caller's estimate of the collection size before the first response.
    ///
    /// Diagnostic only: the first page is fetched regardless, and the walk
    /// follows the `total` each response reports. A mismatch is logged.
    pub total_hint: u64,
}

impl PageOptions {
    pub fn new(limit: u64) -> Self {
        Self { limit, offset: 0, total_hint: 0 }
    }

    pub fn with_total_hint(self, total_hint: u64) -> Self {
        Self { total_hint, ..self }
    }
}

/// A persisted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
    pub total: u64,
    pub key: CacheKey,
}

/// Walk a paged collection, persisting each response under its page key.
///
/// `fetch_page(limit, offset)` performs the remote call. Any error aborts
/// the walk; pages already saved stay in the cache.
pub async fn paginate<T, F, Fut>(
    cache: &Cache, layout: &PageLayout, options: PageOptions, mut fetch_page: F,
) -> Result<Vec<Page>, Error>
where
    T: Paged + Serialize,
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let PageOptions { limit, mut offset, total_hint } = options;
    if limit == 0 {
        return Err(Error::InvalidInput(format!("page limit for {} must be greater than 0", layout.collection)));
    }

    let mut pages = Vec::new();
    loop {
        let response = fetch_page(limit, offset).await?;
        let total = response.total();
        if pages.is_empty() && total != total_hint {
            tracing::debug!(collection = %layout.collection, total_hint, total, "collection size differs from estimate");
        }

        let key = layout.page_key(offset)?;
        cache.save(&key, &response).await?;
        tracing::debug!(%key, offset, limit, total, "page saved");
        pages.push(Page { offset, limit, total, key });

        offset = match offset.checked_add(limit) {
            Some(next) if next <= total => next,
            _ => break,
        };
    }

    Ok(pages)
}
