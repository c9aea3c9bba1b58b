use futures::Stream;
use newsdesk_cache::ArticleStore;
use std::sync::Arc;
use tokio::sync::watch;

use crate::Result;

type QueryFn<T> = dyn Fn(&ArticleStore) -> Result<T> + Send + Sync;

/// A cache read that keeps itself up to date
///
/// The first `next()` yields the current result straight away. After that
/// each call waits for a write to the cache, re-runs the query and yields
/// only if the result differs from the last one handed out.
pub struct LiveQuery<T> {
    store: Arc<ArticleStore>,
    changes: watch::Receiver<u64>,
    query: Arc<QueryFn<T>>,
    last: Option<T>,
    primed: bool,
}

impl<T> LiveQuery<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub(crate) fn new<F>(store: Arc<ArticleStore>, query: F) -> Self
    where
        F: Fn(&ArticleStore) -> Result<T> + Send + Sync + 'static,
    {
        let changes = store.subscribe();
        Self {
            store,
            changes,
            query: Arc::new(query),
            last: None,
            primed: false,
        }
    }

    /// Run the query now, without waiting
    pub fn current(&self) -> Result<T> {
        (self.query)(&self.store)
    }

    /// Next distinct result. `None` only if the cache went away.
    pub async fn next(&mut self) -> Option<Result<T>> {
        loop {
            if self.primed {
                self.changes.changed().await.ok()?;
            } else {
                self.primed = true;
                self.changes.borrow_and_update();
            }

            match self.current() {
                Ok(value) if self.last.as_ref() == Some(&value) => continue,
                Ok(value) => {
                    self.last = Some(value.clone());
                    return Some(Ok(value));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures::stream::unfold(self, |mut query| async move {
            query.next().await.map(|item| (item, query))
        })
    }
}
