use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::SqlitePoolOptions, types::Json, FromRow, QueryBuilder, Sqlite, SqlitePool,
};

use crate::config::ThemeConfig;
use crate::models::{Article, CollectKind, CollectRecord, NewNote, Note, Theme, Toggle};

/// Record store behind the listing endpoints.
///
/// Multi-record reads make no ordering promise unless documented; callers that
/// need a specific order must restore it themselves.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Records for `ids`, in no particular order. Unknown ids are omitted.
    async fn fetch_articles(&self, ids: &[String]) -> anyhow::Result<Vec<Article>>;

    /// A live (not soft-deleted) article.
    async fn find_article(&self, id: &str) -> anyhow::Result<Option<Article>>;

    /// All themes in display order.
    async fn all_themes(&self) -> anyhow::Result<Vec<Theme>>;

    async fn find_theme(&self, id: &str) -> anyhow::Result<Option<Theme>>;

    /// Themes for `ids`, in no particular order.
    async fn fetch_themes(&self, ids: &[String]) -> anyhow::Result<Vec<Theme>>;

    /// One page of themes in display order.
    async fn list_themes(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Theme>>;

    async fn featured_feeds(&self) -> anyhow::Result<Vec<String>>;

    /// Live article count per feed.
    async fn article_counts_by_feed(&self) -> anyhow::Result<HashMap<String, i64>>;

    /// Every target the user collected, in one round trip.
    async fn collected_ids(&self, user_id: &str, kind: CollectKind)
        -> anyhow::Result<Vec<String>>;

    async fn is_collected(
        &self,
        user_id: &str,
        kind: CollectKind,
        target_id: &str,
    ) -> anyhow::Result<bool>;

    async fn toggle_collect(
        &self,
        user_id: &str,
        kind: CollectKind,
        target_id: &str,
    ) -> anyhow::Result<Toggle>;

    /// Newest first.
    async fn list_collects(
        &self,
        user_id: &str,
        kind: CollectKind,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<CollectRecord>>;

    async fn count_collects(&self, user_id: &str, kind: CollectKind) -> anyhow::Result<i64>;

    /// Annotated positions of one article, ascending.
    async fn note_positions(&self, user_id: &str, article_id: &str) -> anyhow::Result<Vec<i64>>;

    async fn toggle_note(&self, note: &NewNote) -> anyhow::Result<Toggle>;

    /// Newest first.
    async fn list_notes(&self, user_id: &str, limit: i64, offset: i64)
        -> anyhow::Result<Vec<Note>>;

    async fn count_notes(&self, user_id: &str) -> anyhow::Result<i64>;

    /// Session ids are issued by the login service; this only reads them.
    async fn resolve_session(&self, session_id: &str) -> anyhow::Result<Option<String>>;
}

#[derive(FromRow)]
struct ArticleRow {
    id: String,
    feed: String,
    title: String,
    description: String,
    tags: Json<Vec<String>>,
    body: String,
    date_published: Option<DateTime<Utc>>,
    is_del: bool,
    kind: String,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: row.id,
            feed: row.feed,
            title: row.title,
            description: row.description,
            tags: row.tags.0,
            body: row.body,
            date_published: row.date_published,
            is_del: row.is_del,
            kind: row.kind,
        }
    }
}

#[derive(FromRow)]
struct ThemeRow {
    id: String,
    name: String,
    description: String,
    image: Option<String>,
    sort: i64,
    feeds: Json<Vec<String>>,
}

impl From<ThemeRow> for Theme {
    fn from(row: ThemeRow) -> Self {
        Theme {
            id: row.id,
            name: row.name,
            desc: row.description,
            image: row.image,
            sort: row.sort,
            feeds: row.feeds.0,
        }
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Each connection to an in-memory database gets its own empty database,
        // so those pools must hold exactly one connection for their lifetime.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                feed TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                body TEXT NOT NULL DEFAULT '',
                date_published TEXT,
                is_del INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS themes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                image TEXT,
                sort INTEGER NOT NULL DEFAULT 0,
                feeds TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS featured_feeds (
                feed_id TEXT PRIMARY KEY,
                status INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collects (
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                target_id TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                PRIMARY KEY (user_id, kind, target_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_collects_user_recent
            ON collects(user_id, kind, collected_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                user_id TEXT NOT NULL,
                article_id TEXT NOT NULL,
                dom_index INTEGER NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT '',
                noted_at TEXT NOT NULL,
                PRIMARY KEY (user_id, article_id, dom_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn sync_themes(&self, configs: &[ThemeConfig]) -> anyhow::Result<()> {
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO themes (id, name, description, image, sort, feeds)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    image = excluded.image,
                    sort = excluded.sort,
                    feeds = excluded.feeds
                "#,
            )
            .bind(&config.id)
            .bind(&config.name)
            .bind(&config.desc)
            .bind(&config.image)
            .bind(config.sort)
            .bind(Json(&config.feeds))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Makes `feed_ids` the active featured set; feeds dropped from it are
    /// kept but deactivated.
    pub async fn sync_featured_feeds(&self, feed_ids: &[String]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE featured_feeds SET status = 0")
            .execute(&mut *tx)
            .await?;

        for feed_id in feed_ids {
            sqlx::query(
                r#"
                INSERT INTO featured_feeds (feed_id, status) VALUES (?, 1)
                ON CONFLICT(feed_id) DO UPDATE SET status = 1
                "#,
            )
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_article(&self, article: &Article) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles
                (id, feed, title, description, tags, body, date_published, is_del, kind)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                feed = excluded.feed,
                title = excluded.title,
                description = excluded.description,
                tags = excluded.tags,
                body = excluded.body,
                date_published = excluded.date_published,
                is_del = excluded.is_del,
                kind = excluded.kind
            "#,
        )
        .bind(&article.id)
        .bind(&article.feed)
        .bind(&article.title)
        .bind(&article.description)
        .bind(Json(&article.tags))
        .bind(&article.body)
        .bind(article.date_published)
        .bind(article.is_del)
        .bind(&article.kind)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Every stored article, soft-deleted ones included. Used to seed the
    /// in-process search index.
    pub async fn all_articles(&self) -> anyhow::Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleRow>("SELECT * FROM articles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    pub async fn put_session(&self, session_id: &str, user_id: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id) VALUES (?, ?)
            ON CONFLICT(session_id) DO UPDATE SET user_id = excluded.user_id
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DocumentStore for Database {
    async fn fetch_articles(&self, ids: &[String]) -> anyhow::Result<Vec<Article>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<ArticleRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    async fn find_article(&self, id: &str) -> anyhow::Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleRow>(
            "SELECT * FROM articles WHERE id = ? AND is_del = 0",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Article::from))
    }

    async fn all_themes(&self) -> anyhow::Result<Vec<Theme>> {
        let rows = sqlx::query_as::<_, ThemeRow>("SELECT * FROM themes ORDER BY sort, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Theme::from).collect())
    }

    async fn find_theme(&self, id: &str) -> anyhow::Result<Option<Theme>> {
        let row = sqlx::query_as::<_, ThemeRow>("SELECT * FROM themes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Theme::from))
    }

    async fn fetch_themes(&self, ids: &[String]) -> anyhow::Result<Vec<Theme>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM themes WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<ThemeRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Theme::from).collect())
    }

    async fn list_themes(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Theme>> {
        let rows = sqlx::query_as::<_, ThemeRow>(
            "SELECT * FROM themes ORDER BY sort, id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Theme::from).collect())
    }

    async fn featured_feeds(&self) -> anyhow::Result<Vec<String>> {
        let feeds = sqlx::query_scalar::<_, String>(
            "SELECT feed_id FROM featured_feeds WHERE status = 1 ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    async fn article_counts_by_feed(&self) -> anyhow::Result<HashMap<String, i64>> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT feed, COUNT(*) FROM articles WHERE is_del = 0 GROUP BY feed",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts.into_iter().collect())
    }

    async fn collected_ids(
        &self,
        user_id: &str,
        kind: CollectKind,
    ) -> anyhow::Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT target_id FROM collects WHERE user_id = ? AND kind = ?",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn is_collected(
        &self,
        user_id: &str,
        kind: CollectKind,
        target_id: &str,
    ) -> anyhow::Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM collects WHERE user_id = ? AND kind = ? AND target_id = ?",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn toggle_collect(
        &self,
        user_id: &str,
        kind: CollectKind,
        target_id: &str,
    ) -> anyhow::Result<Toggle> {
        let deleted = sqlx::query(
            "DELETE FROM collects WHERE user_id = ? AND kind = ? AND target_id = ?",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(target_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted > 0 {
            return Ok(Toggle::Cancelled);
        }

        // A concurrent toggle may have inserted in between; the key stays unique.
        sqlx::query(
            r#"
            INSERT INTO collects (user_id, kind, target_id, collected_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(target_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(Toggle::Added)
    }

    async fn list_collects(
        &self,
        user_id: &str,
        kind: CollectKind,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<CollectRecord>> {
        let records = sqlx::query_as::<_, CollectRecord>(
            r#"
            SELECT user_id, target_id, collected_at FROM collects
            WHERE user_id = ? AND kind = ?
            ORDER BY collected_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn count_collects(&self, user_id: &str, kind: CollectKind) -> anyhow::Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM collects WHERE user_id = ? AND kind = ?")
                .bind(user_id)
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    async fn note_positions(&self, user_id: &str, article_id: &str) -> anyhow::Result<Vec<i64>> {
        let positions = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT dom_index FROM notes
            WHERE user_id = ? AND article_id = ?
            ORDER BY dom_index
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    async fn toggle_note(&self, note: &NewNote) -> anyhow::Result<Toggle> {
        let deleted = sqlx::query(
            "DELETE FROM notes WHERE user_id = ? AND article_id = ? AND dom_index = ?",
        )
        .bind(&note.user_id)
        .bind(&note.article_id)
        .bind(note.dom_index)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted > 0 {
            return Ok(Toggle::Cancelled);
        }

        sqlx::query(
            r#"
            INSERT INTO notes (user_id, article_id, dom_index, text, note, noted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&note.user_id)
        .bind(&note.article_id)
        .bind(note.dom_index)
        .bind(&note.text)
        .bind(&note.note)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(Toggle::Added)
    }

    async fn list_notes(&self, user_id: &str, limit: i64, offset: i64) -> anyhow::Result<Vec<Note>> {
        let notes = sqlx::query_as::<_, Note>(
            r#"
            SELECT user_id, article_id, dom_index, text, note, noted_at FROM notes
            WHERE user_id = ?
            ORDER BY noted_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(notes)
    }

    async fn count_notes(&self, user_id: &str) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn resolve_session(&self, session_id: &str) -> anyhow::Result<Option<String>> {
        let user = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
