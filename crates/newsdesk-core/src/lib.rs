// Core logic: paging, bookmark reconciliation, cache-backed reads
pub mod config;
pub mod error;
pub mod live;
pub mod mapper;
pub mod models;
pub mod paging;
pub mod provider;
pub mod providers;
pub mod repository;
pub mod session;

pub use config::Config;
pub use error::{Error, ErrorKind};
pub use live::LiveQuery;
pub use models::{Article, ArticleSource};
pub use paging::{LoadParams, NewsPagingSource, Page, PagingState};
pub use provider::NewsProvider;
pub use providers::NewsApiProvider;
pub use repository::NewsRepository;
pub use session::{FeedSession, SessionState};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
