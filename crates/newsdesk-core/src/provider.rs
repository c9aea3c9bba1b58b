use newsdesk_api::NewsResponseDto;

use crate::Result;

/// Where articles come from
///
/// One page per call, 1-based. Implementations map their own failures onto
/// [`crate::Error`]'s transport / remote / unexpected buckets.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait NewsProvider: Send + Sync {
    async fn fetch_page(&self, query: &str, page: u32, page_size: u32) -> Result<NewsResponseDto>;
}
