// The one entry point for feeds, bookmarks and cache reads
use newsdesk_cache::ArticleStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    live::LiveQuery,
    mapper,
    models::Article,
    paging::{NewsPagingSource, FIRST_PAGE},
    provider::NewsProvider,
    session::FeedSession,
    Result,
};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Coordinates the news provider, the article cache and bookmarks
///
/// Only this type writes bookmark columns. Pages go through the sessions it
/// hands out; everything else is a direct cache read or a keyed upsert.
pub struct NewsRepository {
    provider: Arc<dyn NewsProvider>,
    store: Arc<ArticleStore>,
    config: Config,
    feed_generation: watch::Sender<u64>,
}

impl NewsRepository {
    pub fn new(provider: Arc<dyn NewsProvider>, store: Arc<ArticleStore>, config: Config) -> Self {
        let (feed_generation, _) = watch::channel(0);
        Self {
            provider,
            store,
            config,
            feed_generation,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a fresh feed for `query`, superseding any earlier one
    ///
    /// Also a good moment to drop stale cache rows, so eviction runs here.
    pub fn fetch_feed(&self, query: &str) -> FeedSession {
        self.feed_generation.send_modify(|generation| *generation += 1);
        debug!("Opening feed '{}' (generation {})", query, *self.feed_generation.borrow());

        if let Err(e) = self.evict_unbookmarked() {
            warn!("Cache eviction failed: {}", e);
        }

        let source = NewsPagingSource::new(self.provider.clone(), self.store.clone(), query.to_string());
        FeedSession::new(
            source,
            self.config.api.page_size,
            self.config.cache.prefetch_distance,
            self.feed_generation.subscribe(),
        )
    }

    /// Feed for the configured default query
    pub fn default_feed(&self) -> FeedSession {
        let query = self.config.api.default_query.clone();
        self.fetch_feed(&query)
    }

    /// Bookmark or un-bookmark `article`
    ///
    /// Bookmarking a cached article only flips its bookmark columns, so a
    /// possibly stale in-memory copy never overwrites cached content.
    /// Un-bookmarking keeps the row.
    pub fn set_bookmark(&self, article: &Article, bookmarked: bool) -> Result<()> {
        if bookmarked {
            let now = mapper::now_millis();
            let row = mapper::model_to_row_at(&mapper::with_bookmark(article.clone(), Some(now)), now);
            self.store.set_bookmarked(&row, now)?;
            info!("Bookmarked {}", article.url);
        } else {
            self.remove_bookmark(&article.url)?;
        }
        Ok(())
    }

    pub fn bookmark_article(&self, article: &Article) -> Result<()> {
        self.set_bookmark(article, true)
    }

    /// Returns false if `url` wasn't bookmarked
    pub fn remove_bookmark(&self, url: &str) -> Result<bool> {
        let removed = self.store.clear_bookmark(url)?;
        if removed {
            info!("Removed bookmark {}", url);
        }
        Ok(removed)
    }

    /// Bookmarks, most recent first, kept current as they change
    pub fn bookmarked_articles(&self) -> LiveQuery<Vec<Article>> {
        LiveQuery::new(self.store.clone(), |store: &ArticleStore| {
            Ok(store
                .bookmarked_articles()?
                .into_iter()
                .map(mapper::row_to_model)
                .collect())
        })
    }

    pub fn lookup_by_url(&self, url: &str) -> Result<Option<Article>> {
        Ok(self.store.get(url)?.map(mapper::row_to_model))
    }

    /// Live form of [`Self::lookup_by_url`]
    pub fn observe_article(&self, url: &str) -> LiveQuery<Option<Article>> {
        let url = url.to_string();
        LiveQuery::new(self.store.clone(), move |store: &ArticleStore| {
            Ok(store.get(&url)?.map(mapper::row_to_model))
        })
    }

    /// True iff `url` is cached and bookmarked
    pub fn is_bookmarked(&self, url: &str) -> Result<bool> {
        Ok(self.store.is_bookmarked(url)?)
    }

    /// Drop non-bookmarked articles cached more than `expiry_days` ago
    pub fn evict_unbookmarked(&self) -> Result<usize> {
        let max_age = i64::from(self.config.cache.expiry_days) * MILLIS_PER_DAY;
        let cutoff = mapper::now_millis() - max_age;
        Ok(self.store.delete_unbookmarked_before(cutoff)?)
    }

    /// One-shot search, not cached
    ///
    /// A blank query returns nothing without touching the network. Results
    /// carry the bookmark state the cache knows about.
    pub async fn search_articles(&self, query: &str) -> Result<Vec<Article>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .provider
            .fetch_page(query, FIRST_PAGE, self.config.api.search_page_size)
            .await?;

        let mut seen = HashSet::new();
        let dtos: Vec<_> = response
            .articles
            .into_iter()
            .filter(|dto| seen.insert(dto.url.clone()))
            .collect();

        let urls: Vec<&str> = dtos.iter().map(|dto| dto.url.as_str()).collect();
        let bookmarks = self.store.bookmark_states(&urls)?;

        Ok(dtos
            .into_iter()
            .map(|dto| {
                let bookmarked_at = bookmarks.get(&dto.url).copied();
                mapper::with_bookmark(mapper::wire_to_model(dto, false), bookmarked_at)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockNewsProvider;
    use newsdesk_api::{ArticleDto, NewsResponseDto, SourceDto};

    fn dto(url: &str) -> ArticleDto {
        ArticleDto {
            source: SourceDto {
                id: Some("wire".into()),
                name: "Wire".into(),
            },
            author: None,
            title: format!("Title {}", url),
            description: Some(format!("Description {}", url)),
            url: url.to_string(),
            url_to_image: None,
            published_at: "2024-05-01T10:00:00Z".into(),
            content: None,
        }
    }

    fn response(urls: &[&str]) -> NewsResponseDto {
        NewsResponseDto {
            status: "ok".into(),
            total_results: urls.len() as u32,
            articles: urls.iter().map(|u| dto(u)).collect(),
        }
    }

    fn repository(mock: MockNewsProvider) -> (NewsRepository, Arc<ArticleStore>) {
        let store = Arc::new(ArticleStore::open_in_memory().unwrap());
        let repo = NewsRepository::new(Arc::new(mock), store.clone(), Config::default());
        (repo, store)
    }

    #[test]
    fn test_bookmark_toggle_keeps_row_and_content() {
        let (repo, _) = repository(MockNewsProvider::new());
        let article = mapper::wire_to_model(dto("u1"), false);

        repo.set_bookmark(&article, true).unwrap();
        let saved = repo.lookup_by_url("u1").unwrap().unwrap();
        assert!(saved.is_bookmarked);
        assert!(saved.bookmarked_at.is_some());

        repo.set_bookmark(&article, false).unwrap();
        let cleared = repo.lookup_by_url("u1").unwrap().unwrap();
        assert!(!cleared.is_bookmarked);
        assert_eq!(cleared.bookmarked_at, None);
        assert_eq!(cleared.title, article.title);
        assert_eq!(cleared.description, article.description);
    }

    #[test]
    fn test_bookmarking_does_not_clobber_cached_content() {
        let (repo, store) = repository(MockNewsProvider::new());
        let full = mapper::wire_to_model(dto("u1"), false);
        store.upsert_articles(&[mapper::model_to_row_at(&full, 1)]).unwrap();

        let mut stale = full.clone();
        stale.title = "Old headline".into();
        stale.description = None;
        repo.bookmark_article(&stale).unwrap();

        let cached = repo.lookup_by_url("u1").unwrap().unwrap();
        assert!(cached.is_bookmarked);
        assert_eq!(cached.title, "Title u1");
        assert_eq!(cached.description.as_deref(), Some("Description u1"));
    }

    #[test]
    fn test_is_bookmarked_and_lookup_of_unknown_url() {
        let (repo, _) = repository(MockNewsProvider::new());
        assert!(!repo.is_bookmarked("nope").unwrap());
        assert!(repo.lookup_by_url("nope").unwrap().is_none());
        assert!(!repo.remove_bookmark("nope").unwrap());

        repo.bookmark_article(&mapper::wire_to_model(dto("u1"), false))
            .unwrap();
        assert!(repo.is_bookmarked("u1").unwrap());
    }

    #[test]
    fn test_eviction_uses_configured_expiry() {
        let (repo, store) = repository(MockNewsProvider::new());
        let now = mapper::now_millis();
        let old = now - 8 * MILLIS_PER_DAY;
        let recent = now - MILLIS_PER_DAY;

        store
            .upsert_articles(&[
                mapper::model_to_row_at(&mapper::wire_to_model(dto("old"), false), old),
                mapper::model_to_row_at(&mapper::wire_to_model(dto("recent"), false), recent),
            ])
            .unwrap();
        let saved = mapper::with_bookmark(mapper::wire_to_model(dto("saved"), false), Some(old));
        store.upsert_articles(&[mapper::model_to_row_at(&saved, old)]).unwrap();

        assert_eq!(repo.evict_unbookmarked().unwrap(), 1);
        assert!(repo.lookup_by_url("old").unwrap().is_none());
        assert!(repo.lookup_by_url("recent").unwrap().is_some());
        assert!(repo.lookup_by_url("saved").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bookmarked_articles_is_live_and_newest_first() {
        let (repo, _) = repository(MockNewsProvider::new());
        let mut bookmarks = repo.bookmarked_articles();
        assert!(bookmarks.next().await.unwrap().unwrap().is_empty());

        let first = mapper::wire_to_model(dto("first"), false);
        let second = mapper::wire_to_model(dto("second"), false);

        repo.bookmark_article(&first).unwrap();
        let list = bookmarks.next().await.unwrap().unwrap();
        assert_eq!(list.len(), 1);

        // Same-millisecond bookmarks would tie; keep them apart
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        repo.bookmark_article(&second).unwrap();
        let list = bookmarks.next().await.unwrap().unwrap();
        let urls: Vec<_> = list.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["second", "first"]);

        repo.remove_bookmark("second").unwrap();
        let list = bookmarks.next().await.unwrap().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].url, "first");
    }

    #[tokio::test]
    async fn test_observe_article_sees_bookmark_change() {
        let (repo, _) = repository(MockNewsProvider::new());
        let article = mapper::wire_to_model(dto("u1"), false);
        let mut observed = repo.observe_article("u1");
        assert_eq!(observed.next().await.unwrap().unwrap(), None);

        repo.bookmark_article(&article).unwrap();
        let seen = observed.next().await.unwrap().unwrap().unwrap();
        assert!(seen.is_bookmarked);
    }

    #[tokio::test]
    async fn test_blank_search_skips_network() {
        let mut mock = MockNewsProvider::new();
        mock.expect_fetch_page().times(0);
        let (repo, _) = repository(mock);

        assert!(repo.search_articles("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_tags_bookmarks_and_does_not_cache() {
        let mut mock = MockNewsProvider::new();
        mock.expect_fetch_page()
            .withf(|query, page, size| query == "rust" && *page == 1 && *size == 50)
            .times(1)
            .returning(|_, _, _| Ok(response(&["u1", "u2"])));
        let (repo, store) = repository(mock);
        repo.bookmark_article(&mapper::wire_to_model(dto("u2"), false))
            .unwrap();

        let results = repo.search_articles(" rust ").await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].is_bookmarked);
        assert!(results[1].is_bookmarked);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_feed_supersedes_old_one() {
        let mut mock = MockNewsProvider::new();
        mock.expect_fetch_page()
            .returning(|query, _, _| {
                let url = format!("{}-1", query);
                Ok(response(&[url.as_str()]))
            });
        let (repo, store) = repository(mock);

        let mut old = repo.fetch_feed("rust");
        old.load_next().await.unwrap();

        let mut new = repo.fetch_feed("tokio");
        assert!(old.is_superseded());
        assert!(matches!(
            old.load_next().await,
            Err(crate::Error::Superseded)
        ));

        let page = new.load_next().await.unwrap().unwrap();
        assert_eq!(page.data[0].url, "tokio-1");
        assert_eq!(store.count().unwrap(), 2);
    }
}
