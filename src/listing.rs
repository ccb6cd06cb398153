//! Listing & enrichment.
//!
//! Every list endpoint runs the same pipeline: rank ids with the search index
//! (or take them from the user's own records), fetch the records from the
//! store, put them back into rank order, then decorate them with per-user
//! state. Store and search calls are each bounded by a timeout and never
//! retried; any failure fails the whole request.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::db::DocumentStore;
use crate::error::AppError;
use crate::models::{Article, CollectKind, NewNote, Note, Theme, Toggle};
use crate::search::{SearchIndex, SearchQuery};

pub const MAX_PAGE: u32 = 40;
pub const ARTICLE_PAGE_SIZE: usize = 24;
pub const THEME_PAGE_SIZE: usize = 10;
pub const RELATED_SIZE: usize = 2;

/// `themeId` value selecting the user's subscribed themes.
pub const SUBSCRIBED_THEMES: &str = "subscribe";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A 1-based page number within `1..=MAX_PAGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page(u32);

impl Page {
    /// Reads the leading integer of `raw` and ignores whatever follows it, so
    /// `"41.5"` is page 41. Missing input, input without leading digits and
    /// non-positive numbers mean page 1. Pages past `MAX_PAGE`, however many
    /// digits they have, yield `None`, which callers answer with an empty result.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let Some(raw) = raw else {
            return Some(Page(1));
        };

        let text = raw.trim_start();
        let (negative, rest) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let digits = &rest[..len];

        if digits.is_empty() || negative {
            return Some(Page(1));
        }

        match digits.parse::<u64>() {
            Ok(number) if number <= u64::from(MAX_PAGE) => Some(Page(number.max(1) as u32)),
            // Too large, including runs that overflow u64
            _ => None,
        }
    }

    pub fn number(self) -> u32 {
        self.0
    }

    pub fn offset(self, size: usize) -> usize {
        (self.0 as usize - 1) * size
    }
}

/// Records that can be matched back to a ranked id.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Article {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Theme {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Order `records` by `ranked`. Ids without a record are dropped; a repeated
/// id keeps its first position. The order `records` arrives in is ignored.
pub fn reconcile<T: Keyed>(ranked: &[String], records: Vec<T>) -> Vec<T> {
    let mut by_id: HashMap<String, T> = records
        .into_iter()
        .map(|record| (record.key().to_string(), record))
        .collect();

    ranked.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// Feed id to owning theme, built from the full theme set.
///
/// Rebuilt on every request; a feed listed by several themes belongs to the
/// first one in display order.
pub struct FeedThemeIndex<'a> {
    owners: HashMap<&'a str, &'a Theme>,
}

impl<'a> FeedThemeIndex<'a> {
    pub fn build(themes: &'a [Theme]) -> Self {
        let mut owners = HashMap::new();
        for theme in themes {
            for feed in &theme.feeds {
                owners.entry(feed.as_str()).or_insert(theme);
            }
        }
        Self { owners }
    }

    pub fn theme_for(&self, feed: &str) -> Option<&'a Theme> {
        self.owners.get(feed).copied()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub theme_id: Option<String>,
    pub theme_name: Option<String>,
    pub is_collected: bool,
}

impl ArticleView {
    pub fn new(article: Article, themes: &FeedThemeIndex<'_>, is_collected: bool) -> Self {
        let theme = themes.theme_for(&article.feed);
        Self {
            theme_id: theme.map(|t| t.id.clone()),
            theme_name: theme.map(|t| t.name.clone()),
            article,
            is_collected,
        }
    }
}

/// Decorate with collection state from one pre-fetched set; no per-record lookups.
pub fn decorate(
    articles: Vec<Article>,
    collected: &HashSet<String>,
    themes: &FeedThemeIndex<'_>,
) -> Vec<ArticleView> {
    articles
        .into_iter()
        .map(|article| {
            let is_collected = collected.contains(&article.id);
            ArticleView::new(article, themes, is_collected)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub desc: String,
}

impl From<&Theme> for ThemeSummary {
    fn from(theme: &Theme) -> Self {
        Self {
            id: theme.id.clone(),
            name: theme.name.clone(),
            desc: theme.desc.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleList {
    pub project_list: Vec<ArticleView>,
    pub theme_list: BTreeMap<String, ThemeSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDetail {
    #[serde(flatten)]
    pub view: ArticleView,
    pub text: String,
    pub notes: Vec<i64>,
    pub like_projects: Vec<Article>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeView {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub desc: String,
    pub image: Option<String>,
    pub is_collected: bool,
    pub article_count: i64,
}

impl ThemeView {
    fn new(theme: Theme, is_collected: bool, counts: &HashMap<String, i64>) -> Self {
        let article_count = theme
            .feeds
            .iter()
            .filter_map(|feed| counts.get(feed))
            .sum();
        Self {
            id: theme.id,
            name: theme.name,
            desc: theme.desc,
            image: theme.image,
            is_collected,
            article_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub project_collect_count: i64,
    pub project_note_count: i64,
    pub theme_collect_count: i64,
}

pub struct Listing {
    store: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchIndex>,
    article_types: Vec<String>,
    search_timeout: Duration,
    store_timeout: Duration,
}

impl Listing {
    pub fn new(store: Arc<dyn DocumentStore>, search: Arc<dyn SearchIndex>) -> Self {
        Self {
            store,
            search,
            article_types: Vec::new(),
            search_timeout: DEFAULT_TIMEOUT,
            store_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_article_types(mut self, article_types: Vec<String>) -> Self {
        self.article_types = article_types;
        self
    }

    pub fn with_timeouts(mut self, search: Duration, store: Duration) -> Self {
        self.search_timeout = search;
        self.store_timeout = store;
        self
    }

    async fn from_store<T, F>(&self, call: F) -> Result<T, AppError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(AppError::Store),
            Err(_) => Err(AppError::Timeout("document store")),
        }
    }

    async fn ranked(&self, query: &SearchQuery) -> Result<Vec<String>, AppError> {
        match timeout(self.search_timeout, self.search.search(query)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AppError::Timeout("search index")),
        }
    }

    pub async fn resolve_session(&self, session_id: &str) -> Result<Option<String>, AppError> {
        self.from_store(self.store.resolve_session(session_id)).await
    }

    async fn feeds_for(&self, user_id: &str, theme_id: Option<&str>) -> Result<Vec<String>, AppError> {
        match theme_id.map(str::trim).filter(|id| !id.is_empty()) {
            None => self.from_store(self.store.featured_feeds()).await,
            Some(SUBSCRIBED_THEMES) => {
                let theme_ids = self
                    .from_store(self.store.collected_ids(user_id, CollectKind::Theme))
                    .await?;
                let themes = self.from_store(self.store.fetch_themes(&theme_ids)).await?;
                let mut seen = HashSet::new();
                Ok(themes
                    .into_iter()
                    .flat_map(|theme| theme.feeds)
                    .filter(|feed| seen.insert(feed.clone()))
                    .collect())
            }
            Some(id) => self
                .from_store(self.store.find_theme(id))
                .await?
                .map(|theme| theme.feeds)
                .ok_or(AppError::NotFound),
        }
    }

    pub async fn list_articles(
        &self,
        user_id: &str,
        page: Option<Page>,
        theme_id: Option<&str>,
        keyword: Option<&str>,
    ) -> Result<ArticleList, AppError> {
        let Some(page) = page else {
            return Ok(ArticleList::default());
        };

        let feeds = self.feeds_for(user_id, theme_id).await?;
        let query = SearchQuery {
            feeds,
            kinds: self.article_types.clone(),
            keyword: keyword.map(str::to_string),
            exclude_ids: Vec::new(),
            from: page.offset(ARTICLE_PAGE_SIZE),
            size: ARTICLE_PAGE_SIZE,
        };
        let ranked = self.ranked(&query).await?;
        debug!("page {} ranked {} articles", page.number(), ranked.len());

        let (themes, collected, articles) = tokio::try_join!(
            self.from_store(self.store.all_themes()),
            self.from_store(self.store.collected_ids(user_id, CollectKind::Article)),
            self.from_store(self.store.fetch_articles(&ranked)),
        )?;

        let collected: HashSet<String> = collected.into_iter().collect();
        let index = FeedThemeIndex::build(&themes);
        let project_list = decorate(reconcile(&ranked, articles), &collected, &index);

        let mut theme_list = BTreeMap::new();
        for view in &project_list {
            if let Some(theme) = index.theme_for(&view.article.feed) {
                theme_list
                    .entry(theme.id.clone())
                    .or_insert_with(|| ThemeSummary::from(theme));
            }
        }

        Ok(ArticleList {
            project_list,
            theme_list,
        })
    }

    pub async fn article_detail(&self, user_id: &str, id: &str) -> Result<ArticleDetail, AppError> {
        let mut article = self
            .from_store(self.store.find_article(id))
            .await?
            .ok_or(AppError::NotFound)?;

        let related = SearchQuery {
            feeds: vec![article.feed.clone()],
            kinds: self.article_types.clone(),
            keyword: None,
            exclude_ids: vec![article.id.clone()],
            from: 0,
            size: RELATED_SIZE,
        };

        let (themes, is_collected, notes, related_ids) = tokio::try_join!(
            self.from_store(self.store.all_themes()),
            self.from_store(
                self.store
                    .is_collected(user_id, CollectKind::Article, &article.id)
            ),
            self.from_store(self.store.note_positions(user_id, &article.id)),
            self.ranked(&related),
        )?;

        let related_articles = self
            .from_store(self.store.fetch_articles(&related_ids))
            .await?;
        let like_projects = reconcile(&related_ids, related_articles);

        let index = FeedThemeIndex::build(&themes);
        let text = std::mem::take(&mut article.body);

        Ok(ArticleDetail {
            view: ArticleView::new(article, &index, is_collected),
            text,
            notes,
            like_projects,
        })
    }

    pub async fn toggle_article_collect(
        &self,
        user_id: &str,
        article_id: &str,
    ) -> Result<Toggle, AppError> {
        let article = self
            .from_store(self.store.find_article(article_id))
            .await?
            .ok_or(AppError::NotFound)?;

        let toggle = self
            .from_store(
                self.store
                    .toggle_collect(user_id, CollectKind::Article, &article.id),
            )
            .await?;
        info!("user {} toggled article {}: {:?}", user_id, article.id, toggle);
        Ok(toggle)
    }

    pub async fn toggle_theme_collect(
        &self,
        user_id: &str,
        theme_id: &str,
    ) -> Result<Toggle, AppError> {
        let theme = self
            .from_store(self.store.find_theme(theme_id))
            .await?
            .ok_or(AppError::NotFound)?;

        let toggle = self
            .from_store(self.store.toggle_collect(user_id, CollectKind::Theme, &theme.id))
            .await?;
        info!("user {} toggled theme {}: {:?}", user_id, theme.id, toggle);
        Ok(toggle)
    }

    pub async fn toggle_note(&self, note: NewNote) -> Result<Toggle, AppError> {
        self.from_store(self.store.find_article(&note.article_id))
            .await?
            .ok_or(AppError::NotFound)?;

        let toggle = self.from_store(self.store.toggle_note(&note)).await?;
        info!(
            "user {} toggled note {}#{}: {:?}",
            note.user_id, note.article_id, note.dom_index, toggle
        );
        Ok(toggle)
    }

    pub async fn list_themes(
        &self,
        user_id: &str,
        page: Option<Page>,
    ) -> Result<Vec<ThemeView>, AppError> {
        let Some(page) = page else {
            return Ok(Vec::new());
        };

        let (themes, collected, counts) = tokio::try_join!(
            self.from_store(
                self.store
                    .list_themes(THEME_PAGE_SIZE as i64, page.offset(THEME_PAGE_SIZE) as i64)
            ),
            self.from_store(self.store.collected_ids(user_id, CollectKind::Theme)),
            self.from_store(self.store.article_counts_by_feed()),
        )?;

        let collected: HashSet<String> = collected.into_iter().collect();
        Ok(themes
            .into_iter()
            .map(|theme| {
                let is_collected = collected.contains(&theme.id);
                ThemeView::new(theme, is_collected, &counts)
            })
            .collect())
    }

    pub async fn user_info(&self, user_id: &str) -> Result<UserInfo, AppError> {
        let (project_collect_count, project_note_count, theme_collect_count) = tokio::try_join!(
            self.from_store(self.store.count_collects(user_id, CollectKind::Article)),
            self.from_store(self.store.count_notes(user_id)),
            self.from_store(self.store.count_collects(user_id, CollectKind::Theme)),
        )?;

        Ok(UserInfo {
            project_collect_count,
            project_note_count,
            theme_collect_count,
        })
    }

    /// Collected articles, most recently collected first.
    pub async fn list_collected_articles(
        &self,
        user_id: &str,
        page: Option<Page>,
    ) -> Result<Vec<ArticleView>, AppError> {
        let Some(page) = page else {
            return Ok(Vec::new());
        };

        let records = self
            .from_store(self.store.list_collects(
                user_id,
                CollectKind::Article,
                ARTICLE_PAGE_SIZE as i64,
                page.offset(ARTICLE_PAGE_SIZE) as i64,
            ))
            .await?;
        let ranked: Vec<String> = records.into_iter().map(|r| r.target_id).collect();

        let (themes, articles) = tokio::try_join!(
            self.from_store(self.store.all_themes()),
            self.from_store(self.store.fetch_articles(&ranked)),
        )?;

        let live: Vec<Article> = articles.into_iter().filter(|a| !a.is_del).collect();
        let collected: HashSet<String> = ranked.iter().cloned().collect();
        let index = FeedThemeIndex::build(&themes);
        Ok(decorate(reconcile(&ranked, live), &collected, &index))
    }

    pub async fn list_notes(&self, user_id: &str, page: Option<Page>) -> Result<Vec<Note>, AppError> {
        let Some(page) = page else {
            return Ok(Vec::new());
        };

        self.from_store(self.store.list_notes(
            user_id,
            ARTICLE_PAGE_SIZE as i64,
            page.offset(ARTICLE_PAGE_SIZE) as i64,
        ))
        .await
    }

    /// Collected themes, most recently collected first.
    pub async fn list_collected_themes(
        &self,
        user_id: &str,
        page: Option<Page>,
    ) -> Result<Vec<ThemeView>, AppError> {
        let Some(page) = page else {
            return Ok(Vec::new());
        };

        let records = self
            .from_store(self.store.list_collects(
                user_id,
                CollectKind::Theme,
                ARTICLE_PAGE_SIZE as i64,
                page.offset(ARTICLE_PAGE_SIZE) as i64,
            ))
            .await?;
        let ranked: Vec<String> = records.into_iter().map(|r| r.target_id).collect();

        let (themes, counts) = tokio::try_join!(
            self.from_store(self.store.fetch_themes(&ranked)),
            self.from_store(self.store.article_counts_by_feed()),
        )?;

        Ok(reconcile(&ranked, themes)
            .into_iter()
            .map(|theme| ThemeView::new(theme, true, &counts))
            .collect())
    }
}
