use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::retry::{is_retryable_status, with_retry, RetryConfig};

pub const NEWS_API_BASE: &str = "https://newsapi.org/v2";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum NewsApiError {
    /// Couldn't reach the server at all, or the connection dropped
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Server answered with a non-2xx status
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Server answered 2xx but said `"status": "error"` in the body
    #[error("API reported an error ({code}): {message}")]
    ApiError { code: String, message: String },

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl NewsApiError {
    /// Transient failures: connection problems, 5xx, 429, 408
    pub fn is_retryable(&self) -> bool {
        match self {
            NewsApiError::NetworkError(e) => !e.is_decode() && !e.is_builder(),
            NewsApiError::HttpStatus { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            NewsApiError::ApiError { .. } | NewsApiError::ParseError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NewsApiError>;

/// Response envelope of `/everything`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewsResponseDto {
    pub status: String,
    #[serde(default)]
    pub total_results: u32,
    #[serde(default)]
    pub articles: Vec<ArticleDto>,
}

/// Article as NewsAPI sends it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDto {
    pub source: SourceDto,
    #[serde(default)]
    pub author: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(default)]
    pub url_to_image: Option<String>,
    pub published_at: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Publisher of an article. `id` is null for most smaller outlets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDto {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

/// Error body NewsAPI sends alongside 4xx/5xx
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct NewsApiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry_config: RetryConfig,
}

impl NewsApiClient {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, NEWS_API_BASE.to_string())
    }

    /// Point the client somewhere else (a proxy, a local mock server)
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self> {
        Self::build(api_key, base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn build(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("Newsdesk/0.1.0"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config: RetryConfig::disabled(),
        })
    }

    /// Opt in to automatic retries of transient failures
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /everything?q=..&page=..&pageSize=..&apiKey=..`
    pub async fn get_everything(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<NewsResponseDto> {
        let url = format!("{}/everything", self.base_url);
        let page = page.to_string();
        let page_size = page_size.to_string();

        with_retry(&self.retry_config, NewsApiError::is_retryable, || async {
            debug!("GET {} q={} page={} pageSize={}", url, query, page, page_size);

            let response = self
                .client
                .get(&url)
                .query(&[
                    ("q", query),
                    ("page", page.as_str()),
                    ("pageSize", page_size.as_str()),
                    ("apiKey", self.api_key.as_str()),
                ])
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                return Err(NewsApiError::HttpStatus {
                    status: status.as_u16(),
                    message: error_message(&body, status),
                });
            }

            parse_response(&body)
        })
        .await
    }
}

/// Decode a 2xx body, turning `"status": "error"` into an error
pub fn parse_response(body: &str) -> Result<NewsResponseDto> {
    let response: NewsResponseDto = serde_json::from_str(body)?;

    if response.status != "ok" {
        let details: Option<ErrorBody> = serde_json::from_str(body).ok();
        let (code, message) = match details {
            Some(ErrorBody { code, message }) => (
                code.unwrap_or_else(|| response.status.clone()),
                message.unwrap_or_default(),
            ),
            None => (response.status.clone(), String::new()),
        };
        return Err(NewsApiError::ApiError { code, message });
    }

    Ok(response)
}

fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}
