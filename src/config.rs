use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Article type tags eligible for listing. Empty means no restriction.
    #[serde(default = "default_article_types")]
    pub article_types: Vec<String>,
    /// Feeds shown when no theme is selected
    #[serde(default)]
    pub featured_feeds: Vec<String>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub themes: Vec<ThemeConfig>,
}

fn default_listen() -> String {
    "0.0.0.0:2013".to_string()
}

fn default_database_url() -> String {
    "sqlite:feedhub.db?mode=rwc".to_string()
}

fn default_article_types() -> Vec<String> {
    vec!["syndicated".to_string()]
}

fn default_index() -> String {
    "articles".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Base URL of the search service. Without it an in-process index is used.
    pub url: Option<String>,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Push every stored article to the search service at startup. The
    /// in-process index is always built this way.
    #[serde(default)]
    pub reindex_on_start: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: None,
            index: default_index(),
            timeout_ms: default_timeout_ms(),
            reindex_on_start: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThemeConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub sort: i64,
    #[serde(default)]
    pub feeds: Vec<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `DATABASE_URL` and `SEARCH_URL` win over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(url) = std::env::var("SEARCH_URL") {
            self.search.url = Some(url).filter(|u| !u.trim().is_empty());
        }
        self
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search.timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.search.timeout_ms == 0 || self.store.timeout_ms == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        let mut seen = HashSet::new();
        for theme in &self.themes {
            if theme.id.trim().is_empty() {
                anyhow::bail!("theme '{}' has an empty id", theme.name);
            }
            if !seen.insert(theme.id.as_str()) {
                anyhow::bail!("duplicate theme id '{}'", theme.id);
            }
        }
        Ok(())
    }
}
