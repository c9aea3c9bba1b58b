// SQLite-backed article cache
// Holds every fetched article keyed by URL, plus the user's bookmarks

pub mod cache;
pub mod error;

pub use cache::{ArticleStore, CachedArticle};
pub use error::{CacheError, Result};
