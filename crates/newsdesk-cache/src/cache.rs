use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{CacheError, Result};

const SELECT_COLUMNS: &str = "url, title, description, content, image_url, source_name, source_id,
     author, published_at, is_bookmarked, bookmarked_at, cached_at";

/// One row of the `articles` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArticle {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub source_name: String,
    pub source_id: Option<String>,
    pub author: Option<String>,
    pub published_at: String,
    pub is_bookmarked: bool,
    /// Epoch millis, set iff `is_bookmarked`
    pub bookmarked_at: Option<i64>,
    /// Epoch millis of the last write
    pub cached_at: i64,
}

impl CachedArticle {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get("url")?,
            title: row.get("title")?,
            description: row.get("description")?,
            content: row.get("content")?,
            image_url: row.get("image_url")?,
            source_name: row.get("source_name")?,
            source_id: row.get("source_id")?,
            author: row.get("author")?,
            published_at: row.get("published_at")?,
            is_bookmarked: row.get("is_bookmarked")?,
            bookmarked_at: row.get("bookmarked_at")?,
            cached_at: row.get("cached_at")?,
        })
    }
}

/// Article cache on SQLite
///
/// A single connection behind a mutex: writes are rare (one page at a time,
/// the odd bookmark toggle) so there's nothing to gain from a pool. Every
/// committed write that touches rows bumps a revision counter that
/// subscribers can wait on.
pub struct ArticleStore {
    conn: Mutex<Connection>,
    changes: watch::Sender<u64>,
}

impl ArticleStore {
    /// Open (or create) the cache at `db_path`
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!("Opened article cache at {}", db_path.display());

        Self::from_connection(conn)
    }

    /// Throwaway cache, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        let (changes, _) = watch::channel(0);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        // The CHECK keeps the bookmark pair honest: a timestamp without the
        // flag (or the other way round) can't be stored.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS articles (
                url TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                content TEXT,
                image_url TEXT,
                source_name TEXT NOT NULL,
                source_id TEXT,
                author TEXT,
                published_at TEXT NOT NULL,
                is_bookmarked INTEGER NOT NULL DEFAULT 0,
                bookmarked_at INTEGER DEFAULT NULL,
                cached_at INTEGER NOT NULL,
                CHECK ((is_bookmarked = 1) = (bookmarked_at IS NOT NULL))
            );
            CREATE INDEX IF NOT EXISTS idx_articles_bookmarked
                ON articles (is_bookmarked, bookmarked_at);
            CREATE INDEX IF NOT EXISTS idx_articles_cached_at
                ON articles (cached_at);",
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn notify(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }

    /// Receiver that sees the revision counter move after each committed write
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Insert-or-replace a batch of rows in one transaction
    ///
    /// Either every row lands or none does; a failing row rolls back the
    /// whole batch.
    pub fn upsert_articles(&self, articles: &[CachedArticle]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO articles
                 (url, title, description, content, image_url, source_name, source_id,
                  author, published_at, is_bookmarked, bookmarked_at, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;

            for article in articles {
                stmt.execute(params![
                    article.url,
                    article.title,
                    article.description,
                    article.content,
                    article.image_url,
                    article.source_name,
                    article.source_id,
                    article.author,
                    article.published_at,
                    article.is_bookmarked,
                    article.bookmarked_at,
                    article.cached_at,
                ])?;
            }
        }
        // Dropping `tx` on an early return above rolls back
        tx.commit()?;
        drop(conn);

        debug!("Cached {} articles", articles.len());
        self.notify();
        Ok(articles.len())
    }

    /// Cache one fetched page and report which of its URLs are bookmarked
    ///
    /// Existing rows get their content refreshed but keep their bookmark
    /// columns; new rows land unbookmarked. The bookmark states are read in
    /// the same transaction, so they match what was committed. All or
    /// nothing, like `upsert_articles`.
    pub fn cache_page(&self, articles: &[CachedArticle]) -> Result<HashMap<String, i64>> {
        if articles.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let states = {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO articles
                 (url, title, description, content, image_url, source_name, source_id,
                  author, published_at, is_bookmarked, bookmarked_at, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, ?10)
                 ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    content = excluded.content,
                    image_url = excluded.image_url,
                    source_name = excluded.source_name,
                    source_id = excluded.source_id,
                    author = excluded.author,
                    published_at = excluded.published_at,
                    cached_at = excluded.cached_at",
            )?;

            for article in articles {
                stmt.execute(params![
                    article.url,
                    article.title,
                    article.description,
                    article.content,
                    article.image_url,
                    article.source_name,
                    article.source_id,
                    article.author,
                    article.published_at,
                    article.cached_at,
                ])?;
            }

            let urls: Vec<&str> = articles.iter().map(|a| a.url.as_str()).collect();
            query_bookmark_states(&tx, &urls)?
        };
        tx.commit()?;
        drop(conn);

        debug!(
            "Cached page of {} articles ({} bookmarked)",
            articles.len(),
            states.len()
        );
        self.notify();
        Ok(states)
    }

    pub fn get(&self, url: &str) -> Result<Option<CachedArticle>> {
        let conn = self.lock()?;
        let article = conn
            .query_row(
                &format!("SELECT {} FROM articles WHERE url = ?1", SELECT_COLUMNS),
                params![url],
                CachedArticle::from_row,
            )
            .optional()?;
        Ok(article)
    }

    /// Bookmark timestamps for those of `urls` that are bookmarked
    pub fn bookmark_states(&self, urls: &[&str]) -> Result<HashMap<String, i64>> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        query_bookmark_states(&conn, urls)
    }

    /// All bookmarked rows, most recently bookmarked first
    pub fn bookmarked_articles(&self) -> Result<Vec<CachedArticle>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM articles
             WHERE is_bookmarked = 1
             ORDER BY bookmarked_at DESC, url ASC",
            SELECT_COLUMNS
        ))?;

        let rows = stmt.query_map([], CachedArticle::from_row)?;
        let mut articles = Vec::new();
        for row in rows {
            articles.push(row?);
        }
        Ok(articles)
    }

    pub fn is_bookmarked(&self, url: &str) -> Result<bool> {
        let conn = self.lock()?;
        let flag = conn
            .query_row(
                "SELECT is_bookmarked FROM articles WHERE url = ?1",
                params![url],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }

    /// Mark `article.url` as bookmarked at `bookmarked_at`
    ///
    /// An existing row only gets its bookmark columns touched, so whatever
    /// richer content the cache already holds is kept. A missing row is
    /// inserted from `article`.
    pub fn set_bookmarked(&self, article: &CachedArticle, bookmarked_at: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO articles
             (url, title, description, content, image_url, source_name, source_id,
              author, published_at, is_bookmarked, bookmarked_at, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11)
             ON CONFLICT(url) DO UPDATE SET
                is_bookmarked = 1,
                bookmarked_at = excluded.bookmarked_at",
            params![
                article.url,
                article.title,
                article.description,
                article.content,
                article.image_url,
                article.source_name,
                article.source_id,
                article.author,
                article.published_at,
                bookmarked_at,
                article.cached_at,
            ],
        )?;
        drop(conn);

        self.notify();
        Ok(())
    }

    /// Clear the bookmark on `url`. The row itself stays cached.
    ///
    /// Returns false when nothing was bookmarked there.
    pub fn clear_bookmark(&self, url: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE articles SET is_bookmarked = 0, bookmarked_at = NULL
             WHERE url = ?1 AND is_bookmarked = 1",
            params![url],
        )?;
        drop(conn);

        if changed > 0 {
            self.notify();
        }
        Ok(changed > 0)
    }

    /// Delete non-bookmarked rows cached before `cutoff` (epoch millis)
    pub fn delete_unbookmarked_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM articles WHERE is_bookmarked = 0 AND cached_at < ?1",
            params![cutoff],
        )?;
        drop(conn);

        if deleted > 0 {
            info!("Evicted {} stale articles from cache", deleted);
            self.notify();
        }
        Ok(deleted)
    }

    /// Delete every non-bookmarked row
    pub fn delete_unbookmarked(&self) -> Result<usize> {
        self.delete_unbookmarked_before(i64::MAX)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn query_bookmark_states(conn: &Connection, urls: &[&str]) -> Result<HashMap<String, i64>> {
    if urls.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; urls.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT url, bookmarked_at FROM articles
         WHERE is_bookmarked = 1 AND url IN ({})",
        placeholders
    ))?;

    let rows = stmt.query_map(params_from_iter(urls.iter()), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut states = HashMap::new();
    for row in rows {
        let (url, bookmarked_at) = row?;
        states.insert(url, bookmarked_at);
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(url: &str, title: &str, cached_at: i64) -> CachedArticle {
        CachedArticle {
            url: url.to_string(),
            title: title.to_string(),
            description: Some(format!("About {}", title)),
            content: None,
            image_url: None,
            source_name: "Wire".to_string(),
            source_id: None,
            author: None,
            published_at: "2024-05-01T10:00:00Z".to_string(),
            is_bookmarked: false,
            bookmarked_at: None,
            cached_at,
        }
    }

    #[test]
    fn test_upsert_same_url_keeps_one_row_with_latest_fields() {
        let store = ArticleStore::open_in_memory().unwrap();

        store.upsert_articles(&[row("u1", "First", 1)]).unwrap();
        store.upsert_articles(&[row("u1", "First", 1)]).unwrap();
        store.upsert_articles(&[row("u1", "Second", 2)]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let cached = store.get("u1").unwrap().unwrap();
        assert_eq!(cached.title, "Second");
        assert_eq!(cached.cached_at, 2);
    }

    #[test]
    fn test_failing_row_rolls_back_whole_batch() {
        let store = ArticleStore::open_in_memory().unwrap();

        // Third row breaks the bookmark CHECK
        let mut poisoned = row("u3", "Bad", 1);
        poisoned.bookmarked_at = Some(42);
        let batch = vec![row("u1", "One", 1), row("u2", "Two", 1), poisoned, row("u4", "Four", 1)];

        assert!(store.upsert_articles(&batch).is_err());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.get("u1").unwrap().is_none());
    }

    #[test]
    fn test_cache_page_refreshes_content_but_keeps_bookmark() {
        let store = ArticleStore::open_in_memory().unwrap();
        store.set_bookmarked(&row("a", "Old title", 1), 50).unwrap();

        // Page rows always arrive untagged
        let states = store
            .cache_page(&[row("a", "New title", 2), row("b", "B", 2)])
            .unwrap();

        assert_eq!(states.len(), 1);
        assert_eq!(states.get("a"), Some(&50));

        let a = store.get("a").unwrap().unwrap();
        assert_eq!(a.title, "New title");
        assert_eq!(a.cached_at, 2);
        assert!(a.is_bookmarked);
        assert_eq!(a.bookmarked_at, Some(50));
        assert!(!store.is_bookmarked("b").unwrap());
    }

    #[test]
    fn test_cache_page_never_undoes_concurrent_bookmark() {
        let store = std::sync::Arc::new(ArticleStore::open_in_memory().unwrap());
        let page: Vec<_> = (0..100).map(|i| row(&format!("u{}", i), "T", 1)).collect();
        store.cache_page(&page).unwrap();

        for round in 0..200 {
            store.clear_bookmark("u0").unwrap();

            let writer = {
                let store = store.clone();
                std::thread::spawn(move || store.set_bookmarked(&row("u0", "T", 1), round).unwrap())
            };
            let states = store.cache_page(&page).unwrap();
            writer.join().unwrap();

            assert!(store.is_bookmarked("u0").unwrap(), "round {}", round);
            // Whatever the page saw must match what was committed with it
            if let Some(at) = states.get("u0") {
                assert_eq!(*at, round);
            }
        }
    }

    #[test]
    fn test_cache_page_rolls_back_on_failure() {
        let store = ArticleStore::open_in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON articles
                 WHEN NEW.url = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = store.cache_page(&[row("a", "A", 1), row("bad", "B", 1), row("c", "C", 1)]);
        assert!(result.is_err());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = ArticleStore::open_in_memory().unwrap();
        assert!(store.get("https://nowhere").unwrap().is_none());
    }

    #[test]
    fn test_set_bookmarked_only_touches_bookmark_columns_of_existing_row() {
        let store = ArticleStore::open_in_memory().unwrap();
        store.upsert_articles(&[row("u1", "Cached title", 10)]).unwrap();

        let mut stale = row("u1", "Stale title", 99);
        stale.description = None;
        store.set_bookmarked(&stale, 1_000).unwrap();

        let cached = store.get("u1").unwrap().unwrap();
        assert!(cached.is_bookmarked);
        assert_eq!(cached.bookmarked_at, Some(1_000));
        assert_eq!(cached.title, "Cached title");
        assert_eq!(cached.description.as_deref(), Some("About Cached title"));
        assert_eq!(cached.cached_at, 10);
    }

    #[test]
    fn test_set_bookmarked_inserts_missing_row() {
        let store = ArticleStore::open_in_memory().unwrap();
        store.set_bookmarked(&row("u9", "New", 5), 777).unwrap();

        let cached = store.get("u9").unwrap().unwrap();
        assert_eq!(cached.title, "New");
        assert!(cached.is_bookmarked);
        assert_eq!(cached.bookmarked_at, Some(777));
    }

    #[test]
    fn test_clear_bookmark_keeps_row() {
        let store = ArticleStore::open_in_memory().unwrap();
        store.set_bookmarked(&row("u1", "Keep me", 5), 100).unwrap();

        assert!(store.clear_bookmark("u1").unwrap());
        assert!(!store.clear_bookmark("u1").unwrap());

        let cached = store.get("u1").unwrap().unwrap();
        assert!(!cached.is_bookmarked);
        assert_eq!(cached.bookmarked_at, None);
        assert_eq!(cached.title, "Keep me");
    }

    #[test]
    fn test_bookmarked_articles_newest_first() {
        let store = ArticleStore::open_in_memory().unwrap();
        store.upsert_articles(&[row("a", "A", 1), row("b", "B", 1), row("c", "C", 1)]).unwrap();
        store.set_bookmarked(&row("a", "A", 1), 100).unwrap();
        store.set_bookmarked(&row("c", "C", 1), 300).unwrap();
        store.set_bookmarked(&row("b", "B", 1), 200).unwrap();

        let urls: Vec<_> = store
            .bookmarked_articles()
            .unwrap()
            .into_iter()
            .map(|a| a.url)
            .collect();
        assert_eq!(urls, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_bookmark_states_only_reports_bookmarked_urls() {
        let store = ArticleStore::open_in_memory().unwrap();
        store.upsert_articles(&[row("a", "A", 1), row("b", "B", 1)]).unwrap();
        store.set_bookmarked(&row("b", "B", 1), 55).unwrap();

        let states = store.bookmark_states(&["a", "b", "zzz"]).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states.get("b"), Some(&55));
        assert!(store.bookmark_states(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_is_bookmarked() {
        let store = ArticleStore::open_in_memory().unwrap();
        store.upsert_articles(&[row("a", "A", 1)]).unwrap();
        store.set_bookmarked(&row("b", "B", 1), 1).unwrap();

        assert!(!store.is_bookmarked("a").unwrap());
        assert!(store.is_bookmarked("b").unwrap());
        assert!(!store.is_bookmarked("unknown").unwrap());
    }

    #[test]
    fn test_eviction_spares_bookmarks_and_fresh_rows() {
        let store = ArticleStore::open_in_memory().unwrap();
        store
            .upsert_articles(&[row("old", "Old", 100), row("fresh", "Fresh", 5_000)])
            .unwrap();
        store.set_bookmarked(&row("old-saved", "Saved", 100), 150).unwrap();

        assert_eq!(store.delete_unbookmarked_before(1_000).unwrap(), 1);
        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("fresh").unwrap().is_some());
        assert!(store.get("old-saved").unwrap().is_some());

        assert_eq!(store.delete_unbookmarked().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_writes_bump_revision() {
        let store = ArticleStore::open_in_memory().unwrap();
        let rx = store.subscribe();
        assert_eq!(store.revision(), 0);

        store.upsert_articles(&[row("a", "A", 1)]).unwrap();
        assert_eq!(store.revision(), 1);
        assert!(rx.has_changed().unwrap());

        // No-op writes stay quiet
        store.upsert_articles(&[]).unwrap();
        assert!(!store.clear_bookmark("a").unwrap());
        assert_eq!(store.delete_unbookmarked_before(0).unwrap(), 0);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("articles.db");

        {
            let store = ArticleStore::open(&path).unwrap();
            store.set_bookmarked(&row("a", "A", 1), 10).unwrap();
        }

        let reopened = ArticleStore::open(&path).unwrap();
        assert!(reopened.is_bookmarked("a").unwrap());
    }
}
