// Conversions between the wire DTO, the cache row and the domain Article.
// None of these can fail: absent optionals stay absent.
use chrono::Utc;
use newsdesk_api::ArticleDto;
use newsdesk_cache::CachedArticle;

use crate::models::{Article, ArticleSource};

/// Current time in epoch millis
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Wire DTO -> domain. The API knows nothing about bookmarks, so the caller
/// says whether it's bookmarked; the timestamp is stamped separately.
pub fn wire_to_model(dto: ArticleDto, bookmarked: bool) -> Article {
    Article {
        url: dto.url,
        title: dto.title,
        description: dto.description,
        content: dto.content,
        image_url: dto.url_to_image,
        source: ArticleSource {
            id: dto.source.id,
            name: dto.source.name,
        },
        author: dto.author,
        published_at: dto.published_at,
        is_bookmarked: bookmarked,
        bookmarked_at: None,
    }
}

/// Overlay known bookmark state: `Some(ts)` bookmarks at `ts`, `None` clears
pub fn with_bookmark(mut article: Article, bookmarked_at: Option<i64>) -> Article {
    article.is_bookmarked = bookmarked_at.is_some();
    article.bookmarked_at = bookmarked_at;
    article
}

pub fn row_to_model(row: CachedArticle) -> Article {
    Article {
        url: row.url,
        title: row.title,
        description: row.description,
        content: row.content,
        image_url: row.image_url,
        source: ArticleSource {
            id: row.source_id,
            name: row.source_name,
        },
        author: row.author,
        published_at: row.published_at,
        is_bookmarked: row.is_bookmarked,
        bookmarked_at: row.bookmarked_at,
    }
}

/// Domain -> row, stamped with the current time
pub fn model_to_row(article: &Article) -> CachedArticle {
    model_to_row_at(article, now_millis())
}

pub fn model_to_row_at(article: &Article, cached_at: i64) -> CachedArticle {
    CachedArticle {
        url: article.url.clone(),
        title: article.title.clone(),
        description: article.description.clone(),
        content: article.content.clone(),
        image_url: article.image_url.clone(),
        source_name: article.source.name.clone(),
        source_id: article.source.id.clone(),
        author: article.author.clone(),
        published_at: article.published_at.clone(),
        is_bookmarked: article.is_bookmarked,
        bookmarked_at: article.bookmarked_at,
        cached_at,
    }
}
