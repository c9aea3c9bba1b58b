use serde::{Deserialize, Serialize};

/// A news article - identified by its URL, nothing else
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub source: ArticleSource,
    pub author: Option<String>,
    /// As the source formats it, usually RFC 3339
    pub published_at: String,
    pub is_bookmarked: bool,
    /// Epoch millis; `Some` exactly when `is_bookmarked`
    pub bookmarked_at: Option<i64>,
}

/// Outlet that published an article
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleSource {
    pub id: Option<String>,
    pub name: String,
}

impl Article {
    /// Date part of `published_at` ("2024-05-01T10:00:00Z" -> "2024-05-01")
    pub fn formatted_date(&self) -> &str {
        self.published_at
            .split('T')
            .next()
            .unwrap_or(&self.published_at)
    }

    /// Description cut to `max_length` characters, with a fallback when there is none
    pub fn short_description(&self, max_length: usize) -> String {
        match &self.description {
            Some(text) if text.chars().count() > max_length => {
                let truncated: String = text.chars().take(max_length).collect();
                format!("{}...", truncated)
            }
            Some(text) => text.clone(),
            None => "No description available".to_string(),
        }
    }
}
