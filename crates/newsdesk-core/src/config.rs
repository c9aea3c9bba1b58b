use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Loaded from `config.toml`; CLI flags and env vars are layered on top by
/// the binary. Missing keys fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load config from the default location, or defaults if there is none
    pub fn load() -> crate::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> crate::Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)?;
            Self::from_toml(&contents)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        toml::from_str(contents)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save config to the default location
    pub fn save(&self) -> crate::Result<PathBuf> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> crate::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(config_path, contents)?;
        Ok(())
    }

    /// `<config dir>/newsdesk/config.toml`
    pub fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?;
        Ok(config_dir.join("newsdesk").join("config.toml"))
    }

    /// Configured cache path, or `<data dir>/newsdesk/articles.db`
    pub fn database_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = &self.cache.db_path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))?;
        Ok(data_dir.join("newsdesk").join("articles.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// NewsAPI base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Get one at https://newsapi.org/register
    #[serde(default)]
    pub api_key: Option<String>,

    /// Articles per feed page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Feed query when none is given
    #[serde(default = "default_query")]
    pub default_query: String,

    /// Results for a one-shot search
    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,

    /// Automatic retries of transient failures; 0 leaves retrying to the caller
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    newsdesk_api::NEWS_API_BASE.to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_query() -> String {
    "technology".to_string()
}

fn default_search_page_size() -> u32 {
    50
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            page_size: default_page_size(),
            default_query: default_query(),
            search_page_size: default_search_page_size(),
            max_retries: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Where the SQLite cache lives
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Non-bookmarked articles older than this get evicted
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,

    /// How close to the end of the loaded items a reader gets before the
    /// next page should be requested
    #[serde(default = "default_prefetch_distance")]
    pub prefetch_distance: usize,
}

fn default_expiry_days() -> u32 {
    7
}

fn default_prefetch_distance() -> usize {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            expiry_days: default_expiry_days(),
            prefetch_distance: default_prefetch_distance(),
        }
    }
}
