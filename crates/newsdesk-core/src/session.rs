// Pagination session for one feed query
use std::collections::HashSet;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    error::ErrorKind,
    models::Article,
    paging::{LoadParams, NewsPagingSource, Page, PagingState, FIRST_PAGE},
    Error, Result,
};

/// Where a session is at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing requested yet
    Idle,
    /// Fetch of page `k` in flight
    LoadingPage(u32),
    /// At least one page loaded; `end_of_stream` once the source ran dry
    Loaded { pages: usize, end_of_stream: bool },
    /// Page `key` failed; `retry()` tries the same key again
    Error {
        key: u32,
        kind: ErrorKind,
        message: String,
    },
    /// A newer feed took over. Terminal.
    Superseded,
}

/// Which end of the loaded pages a load extends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Append,
    Prepend,
    /// Swap out every loaded page, once the new one is in
    Replace,
}

/// Live paginated feed for one query
///
/// Pages are fetched on demand, kept in order and unique by URL across the
/// whole session. Opening a newer feed from the same repository supersedes
/// this one: a fetch in flight is dropped before anything is cached, and
/// every later load fails with [`Error::Superseded`].
pub struct FeedSession {
    source: NewsPagingSource,
    page_size: u32,
    prefetch_distance: usize,
    pages: Vec<Page>,
    seen: HashSet<String>,
    state: SessionState,
    failed: Option<(u32, Direction)>,
    generation: u64,
    generations: watch::Receiver<u64>,
}

impl FeedSession {
    pub(crate) fn new(
        source: NewsPagingSource,
        page_size: u32,
        prefetch_distance: usize,
        generations: watch::Receiver<u64>,
    ) -> Self {
        let generation = *generations.borrow();
        Self {
            source,
            page_size,
            prefetch_distance,
            pages: Vec::new(),
            seen: HashSet::new(),
            state: SessionState::Idle,
            failed: None,
            generation,
            generations,
        }
    }

    pub fn query(&self) -> &str {
        self.source.query()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Every loaded article, in page order
    pub fn articles(&self) -> impl Iterator<Item = &Article> {
        self.pages.iter().flat_map(|page| page.data.iter())
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|page| page.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_superseded(&self) -> bool {
        *self.generations.borrow() != self.generation
    }

    /// True once the last loaded page has no successor
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.pages.last(), Some(page) if page.next_key.is_none())
    }

    /// Key the next `load_next` will request, `None` at end of stream
    pub fn next_key(&self) -> Option<u32> {
        match self.pages.last() {
            Some(page) => page.next_key,
            None => Some(FIRST_PAGE),
        }
    }

    /// Whether a reader at `position` is close enough to the end to want more
    pub fn should_load_more(&self, position: usize) -> bool {
        !self.is_end_of_stream() && position + self.prefetch_distance >= self.len()
    }

    /// Load the page after the last one. `Ok(None)` at end of stream.
    pub async fn load_next(&mut self) -> Result<Option<&Page>> {
        match self.next_key() {
            Some(key) => self.load(key, Direction::Append).await.map(Some),
            None => Ok(None),
        }
    }

    /// Load the page before the first one, after a refresh started mid-stream
    pub async fn load_previous(&mut self) -> Result<Option<&Page>> {
        match self.pages.first().and_then(|page| page.prev_key) {
            Some(key) => self.load(key, Direction::Prepend).await.map(Some),
            None => Ok(None),
        }
    }

    /// Re-request the page that last failed
    pub async fn retry(&mut self) -> Result<&Page> {
        let (key, direction) = self
            .failed
            .ok_or_else(|| Error::InvalidRequest("no failed page to retry".into()))?;
        self.load(key, direction).await
    }

    /// Restart near `anchor_position` (page 1 without one)
    ///
    /// The loaded pages stay until the restart page is in. If it fails they
    /// are kept, and `retry()` repeats the refresh.
    pub async fn refresh(&mut self, anchor_position: Option<usize>) -> Result<&Page> {
        let state = PagingState {
            pages: std::mem::take(&mut self.pages),
            anchor_position,
        };
        let key = self.source.refresh_key(&state).unwrap_or(FIRST_PAGE);
        self.pages = state.pages;
        debug!("Refreshing '{}' from page {}", self.query(), key);

        self.failed = None;
        self.load(key, Direction::Replace).await
    }

    async fn load(&mut self, key: u32, direction: Direction) -> Result<&Page> {
        if self.is_superseded() {
            self.state = SessionState::Superseded;
            return Err(Error::Superseded);
        }

        let params = LoadParams::page(key, self.page_size);
        NewsPagingSource::validate(params)?;
        self.state = SessionState::LoadingPage(key);

        let fetched = {
            let generation = self.generation;
            let mut generations = self.generations.clone();
            tokio::select! {
                biased;
                _ = wait_superseded(&mut generations, generation) => None,
                result = self.source.fetch(key, params.load_size) => Some(result),
            }
        };

        // Superseded mid-flight, or right as the response came in: either
        // way the page is discarded uncached.
        let response = match fetched {
            Some(_) if self.is_superseded() => None,
            other => other,
        };
        let Some(response) = response else {
            info!("Discarding page {} of superseded feed '{}'", key, self.query());
            self.state = SessionState::Superseded;
            return Err(Error::Superseded);
        };

        let page = match response.and_then(|r| self.source.commit(key, r.articles)) {
            Ok(page) => page,
            Err(e) => {
                self.failed = Some((key, direction));
                self.state = SessionState::Error {
                    key,
                    kind: e.kind(),
                    message: e.to_string(),
                };
                return Err(e);
            }
        };

        self.failed = None;
        Ok(self.push(page, direction))
    }

    /// Add a committed page, keeping each URL on the earliest page it
    /// appears on
    fn push(&mut self, mut page: Page, direction: Direction) -> &Page {
        if direction == Direction::Replace {
            self.pages.clear();
            self.seen.clear();
        }

        let index = match direction {
            Direction::Append | Direction::Replace => {
                let seen = &mut self.seen;
                page.data.retain(|article| seen.insert(article.url.clone()));
                self.pages.push(page);
                self.pages.len() - 1
            }
            Direction::Prepend => {
                let mut own = HashSet::new();
                page.data.retain(|article| own.insert(article.url.clone()));
                for later in &mut self.pages {
                    later.data.retain(|article| !own.contains(&article.url));
                }
                self.seen.extend(own);
                self.pages.insert(0, page);
                0
            }
        };

        self.state = SessionState::Loaded {
            pages: self.pages.len(),
            end_of_stream: self.is_end_of_stream(),
        };
        &self.pages[index]
    }
}

/// Resolves once the repository's feed generation moves past `mine`
async fn wait_superseded(generations: &mut watch::Receiver<u64>, mine: u64) {
    loop {
        if *generations.borrow_and_update() != mine {
            return;
        }
        if generations.changed().await.is_err() {
            // Repository is gone, nobody can supersede us any more
            std::future::pending::<()>().await;
        }
    }
}
