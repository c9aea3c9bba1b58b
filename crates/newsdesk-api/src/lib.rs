// HTTP client for the NewsAPI `/everything` endpoint
pub mod newsapi;
pub mod retry;

// Re-export common types
pub use newsapi::{
    ArticleDto, NewsApiClient, NewsApiError, NewsResponseDto, SourceDto, NEWS_API_BASE,
};
pub use retry::RetryConfig;
