use anyhow::{bail, Context};
use clap::Parser;
use newsdesk_api::NewsResponseDto;
use newsdesk_cache::ArticleStore;
use newsdesk_core::{
    Article, Config, Error, NewsApiProvider, NewsProvider, NewsRepository,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "newsdesk")]
#[command(version, about = "Read, search and bookmark news from NewsAPI", long_about = None)]
struct Cli {
    /// NewsAPI key (overrides the config file)
    #[arg(long, env = "NEWS_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// NewsAPI base URL (overrides the config file)
    #[arg(long, env = "NEWS_API_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Article cache location
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Page through the feed for a query
    Feed {
        /// Search query (defaults to the configured one)
        query: Option<String>,
        /// How many pages to load
        #[arg(short, long, default_value_t = 1)]
        pages: u32,
    },
    /// One-shot search
    Search {
        query: String,
    },
    /// Bookmark a cached article
    Bookmark {
        url: String,
    },
    /// Remove a bookmark
    Unbookmark {
        url: String,
    },
    /// List bookmarks, newest first
    Bookmarks {
        /// Keep running and print the list again whenever it changes
        #[arg(short, long)]
        watch: bool,
    },
    /// Show a cached article
    Show {
        url: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop expired, non-bookmarked articles from the cache
    Evict,
    /// Print the effective configuration
    Config {
        /// Write a config file with the defaults, if there isn't one yet
        #[arg(long)]
        init: bool,
    },
}

/// Stand-in provider for when no API key is configured
struct OfflineProvider;

#[async_trait::async_trait]
impl NewsProvider for OfflineProvider {
    async fn fetch_page(
        &self,
        _query: &str,
        _page: u32,
        _page_size: u32,
    ) -> newsdesk_core::Result<NewsResponseDto> {
        Err(Error::ConfigError(
            "No NewsAPI key configured. Pass --api-key or set NEWS_API_KEY".into(),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdesk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("No command specified. Try --help");
        return Ok(());
    };

    if let Commands::Config { init: true } = command {
        let path = Config::config_path()?;
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        Config::default().save()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let mut config = Config::load().context("failed to load config")?;
    if let Some(key) = cli.api_key {
        config.api.api_key = Some(key);
    }
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }
    if let Some(db) = cli.db {
        config.cache.db_path = Some(db);
    }

    if let Commands::Config { .. } = command {
        println!("# {}", Config::config_path()?.display());
        let mut shown = config.clone();
        if shown.api.api_key.is_some() {
            shown.api.api_key = Some("<redacted>".into());
        }
        print!("{}", toml_string(&shown)?);
        return Ok(());
    }

    let db_path = config.database_path()?;
    let store = Arc::new(
        ArticleStore::open(&db_path)
            .with_context(|| format!("failed to open cache at {}", db_path.display()))?,
    );

    let provider: Arc<dyn NewsProvider> = match NewsApiProvider::from_config(&config.api) {
        Ok(provider) => Arc::new(provider),
        Err(Error::ConfigError(reason)) => {
            tracing::debug!("Running offline: {}", reason);
            Arc::new(OfflineProvider)
        }
        Err(e) => return Err(e.into()),
    };
    let repo = NewsRepository::new(provider, store, config);

    match command {
        Commands::Feed { query, pages } => {
            let mut feed = match query {
                Some(query) => repo.fetch_feed(&query),
                None => repo.default_feed(),
            };
            tracing::info!("Loading {} page(s) of '{}'", pages, feed.query());

            for _ in 0..pages {
                match feed.load_next().await? {
                    Some(page) => {
                        println!("-- page {} --", page.key);
                        for article in &page.data {
                            print_article(article);
                        }
                    }
                    None => {
                        println!("-- end of feed --");
                        break;
                    }
                }
            }
        }
        Commands::Search { query } => {
            let results = repo.search_articles(&query).await?;
            if results.is_empty() {
                println!("No results for '{}'", query);
            }
            for article in &results {
                print_article(article);
            }
        }
        Commands::Bookmark { url } => {
            let Some(article) = repo.lookup_by_url(&url)? else {
                bail!("{} isn't cached - load it through a feed or search first", url);
            };
            repo.set_bookmark(&article, true)?;
            println!("Bookmarked: {}", article.title);
        }
        Commands::Unbookmark { url } => {
            if repo.remove_bookmark(&url)? {
                println!("Removed bookmark: {}", url);
            } else {
                println!("{} wasn't bookmarked", url);
            }
        }
        Commands::Bookmarks { watch } => {
            let mut bookmarks = repo.bookmarked_articles();
            while let Some(list) = bookmarks.next().await {
                let list = list?;
                println!("{} bookmark(s)", list.len());
                for article in &list {
                    print_article(article);
                }
                if !watch {
                    break;
                }
            }
        }
        Commands::Show { url, json } => match repo.lookup_by_url(&url)? {
            Some(article) if json => println!("{}", serde_json::to_string_pretty(&article)?),
            Some(article) => {
                print_article(&article);
                if let Some(author) = &article.author {
                    println!("    by {}", author);
                }
                if let Some(content) = &article.content {
                    println!("\n{}", content);
                }
            }
            None => bail!("{} isn't cached", url),
        },
        Commands::Evict => {
            let evicted = repo.evict_unbookmarked()?;
            println!("Evicted {} article(s)", evicted);
        }
        // Printed before the cache was opened
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn print_article(article: &Article) {
    let marker = if article.is_bookmarked { "*" } else { " " };
    println!(
        "{} {} [{}] {}",
        marker,
        article.formatted_date(),
        article.source.name,
        article.title
    );
    println!("    {}", article.short_description(150));
    println!("    {}", article.url);
}

fn toml_string(config: &Config) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
