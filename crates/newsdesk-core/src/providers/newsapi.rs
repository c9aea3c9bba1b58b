// NewsAPI provider - bridges the HTTP client with the NewsProvider trait
use async_trait::async_trait;
use newsdesk_api::{NewsApiClient, NewsResponseDto, RetryConfig};
use std::time::Duration;

use crate::{config::ApiConfig, provider::NewsProvider, Error, Result};

/// Wrapper around NewsApiClient that implements NewsProvider
pub struct NewsApiProvider {
    client: NewsApiClient,
}

impl NewsApiProvider {
    pub fn new(client: NewsApiClient) -> Self {
        Self { client }
    }

    /// Build a client from the `[api]` config section
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::ConfigError(
                    "No NewsAPI key configured. Set api.api_key or NEWS_API_KEY".into(),
                )
            })?;

        let client = NewsApiClient::build(
            api_key,
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?
        .with_retry_config(RetryConfig::with_max_retries(config.max_retries));

        Ok(Self::new(client))
    }
}

#[async_trait]
impl NewsProvider for NewsApiProvider {
    async fn fetch_page(&self, query: &str, page: u32, page_size: u32) -> Result<NewsResponseDto> {
        Ok(self.client.get_everything(query, page, page_size).await?)
    }
}
