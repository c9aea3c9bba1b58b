use newsdesk_api::NewsApiError;
use newsdesk_cache::CacheError;
use thiserror::Error;

/// Everything that can go wrong between the news API and the cache
#[derive(Error, Debug)]
pub enum Error {
    /// No network, connection reset, timeout
    #[error("Network error: {0}")]
    Transport(String),

    /// The API answered with a non-2xx status
    #[error("API returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// Malformed body, API-reported failure, anything we didn't see coming
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Cache operation failed: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A newer feed replaced the session this load belonged to
    #[error("Feed was superseded by a newer query")]
    Superseded,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// The three buckets a page load failure can fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Remote,
    Unexpected,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Remote { .. } => ErrorKind::Remote,
            _ => ErrorKind::Unexpected,
        }
    }
}

impl From<NewsApiError> for Error {
    fn from(err: NewsApiError) -> Self {
        match err {
            NewsApiError::NetworkError(e) if e.is_decode() => Error::Unexpected(e.to_string()),
            NewsApiError::NetworkError(e) => Error::Transport(e.to_string()),
            NewsApiError::HttpStatus { status, message } => Error::Remote { status, message },
            e @ NewsApiError::ApiError { .. } => Error::Unexpected(e.to_string()),
            e @ NewsApiError::ParseError(_) => Error::Unexpected(e.to_string()),
        }
    }
}
