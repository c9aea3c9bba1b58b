// One page at a time: fetch, tag bookmarks, cache, hand back
use newsdesk_cache::ArticleStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    mapper,
    models::Article,
    provider::NewsProvider,
    Error, Result,
};

/// First page key
pub const FIRST_PAGE: u32 = 1;

/// What to load: `key` of `None` means the first page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParams {
    pub key: Option<u32>,
    pub load_size: u32,
}

impl LoadParams {
    pub fn first(load_size: u32) -> Self {
        Self {
            key: None,
            load_size,
        }
    }

    pub fn page(key: u32, load_size: u32) -> Self {
        Self {
            key: Some(key),
            load_size,
        }
    }
}

/// A loaded page plus the keys of its neighbours
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub key: u32,
    pub data: Vec<Article>,
    /// `None` on the first page
    pub prev_key: Option<u32>,
    /// `None` once the source runs dry
    pub next_key: Option<u32>,
}

/// Loaded pages and where the reader currently is, for picking a refresh key
#[derive(Debug, Clone, Default)]
pub struct PagingState {
    pub pages: Vec<Page>,
    /// Index into the concatenation of all pages' items
    pub anchor_position: Option<usize>,
}

impl PagingState {
    /// Page holding `position`, clamped to the first/last page
    pub fn closest_page_to_position(&self, position: usize) -> Option<&Page> {
        let mut remaining = position;
        for page in &self.pages {
            if remaining < page.data.len() {
                return Some(page);
            }
            remaining -= page.data.len();
        }
        self.pages.last()
    }
}

/// Keys a page sits between. An empty page, or the last representable
/// key, means end of stream.
pub fn adjacent_keys(key: u32, is_empty: bool) -> (Option<u32>, Option<u32>) {
    let prev_key = if key <= FIRST_PAGE { None } else { Some(key - 1) };
    let next_key = if is_empty { None } else { key.checked_add(1) };
    (prev_key, next_key)
}

/// Paging source for one query
///
/// Each `load` fetches exactly one page, overlays the bookmark state the
/// cache knows about, and commits the whole page to the cache in a single
/// transaction before returning it. A failure anywhere leaves the cache as
/// it was.
pub struct NewsPagingSource {
    provider: Arc<dyn NewsProvider>,
    store: Arc<ArticleStore>,
    query: String,
}

impl NewsPagingSource {
    pub fn new(provider: Arc<dyn NewsProvider>, store: Arc<ArticleStore>, query: String) -> Self {
        Self {
            provider,
            store,
            query,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub async fn load(&self, params: LoadParams) -> Result<Page> {
        let key = Self::validate(params)?;
        let response = self.fetch(key, params.load_size).await?;
        self.commit(key, response.articles)
    }

    pub(crate) fn validate(params: LoadParams) -> Result<u32> {
        let key = params.key.unwrap_or(FIRST_PAGE);
        if key < FIRST_PAGE {
            return Err(Error::InvalidRequest(format!("page key must be >= 1, got {}", key)));
        }
        if params.load_size == 0 {
            return Err(Error::InvalidRequest("page size must be positive".into()));
        }
        Ok(key)
    }

    /// The only await point of a load. Dropping the load future here leaves
    /// nothing behind.
    pub(crate) async fn fetch(
        &self,
        key: u32,
        load_size: u32,
    ) -> Result<newsdesk_api::NewsResponseDto> {
        debug!("Fetching page {} of '{}' ({} per page)", key, self.query, load_size);
        self.provider
            .fetch_page(&self.query, key, load_size)
            .await
            .map_err(|e| {
                warn!("Page {} of '{}' failed: {}", key, self.query, e);
                e
            })
    }

    /// Tag and cache a fetched page. Synchronous, so it runs to completion
    /// once started.
    pub(crate) fn commit(&self, key: u32, dtos: Vec<newsdesk_api::ArticleDto>) -> Result<Page> {
        let mut seen = HashSet::new();
        let dtos: Vec<_> = dtos
            .into_iter()
            .filter(|dto| seen.insert(dto.url.clone()))
            .collect();

        let articles: Vec<Article> = dtos
            .into_iter()
            .map(|dto| mapper::wire_to_model(dto, false))
            .collect();

        let cached_at = mapper::now_millis();
        let rows: Vec<_> = articles
            .iter()
            .map(|article| mapper::model_to_row_at(article, cached_at))
            .collect();

        // Bookmark columns are left alone by the write; tag from what it saw
        let bookmarks = self.store.cache_page(&rows)?;
        let articles: Vec<Article> = articles
            .into_iter()
            .map(|article| {
                let bookmarked_at = bookmarks.get(&article.url).copied();
                mapper::with_bookmark(article, bookmarked_at)
            })
            .collect();

        let (prev_key, next_key) = adjacent_keys(key, articles.is_empty());
        info!(
            "Loaded page {} of '{}': {} articles ({} bookmarked)",
            key,
            self.query,
            articles.len(),
            bookmarks.len()
        );

        Ok(Page {
            key,
            data: articles,
            prev_key,
            next_key,
        })
    }

    /// Key to restart from so the reader lands near `anchor_position`
    pub fn refresh_key(&self, state: &PagingState) -> Option<u32> {
        let anchor = state.anchor_position?;
        let page = state.closest_page_to_position(anchor)?;
        page.prev_key
            .map(|prev| prev + 1)
            .or_else(|| page.next_key.map(|next| next - 1))
    }
}
