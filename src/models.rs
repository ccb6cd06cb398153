use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// An aggregated article. Written by the ingestion pipeline, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(rename = "_id")]
    pub id: String,
    pub feed: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Full text. Only exposed through the detail view.
    #[serde(skip_serializing)]
    pub body: String,
    pub date_published: Option<DateTime<Utc>>,
    pub is_del: bool,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A named grouping of feeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Theme {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub desc: String,
    pub image: Option<String>,
    pub sort: i64,
    pub feeds: Vec<String>,
}

/// What a collection record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectKind {
    Article,
    Theme,
}

impl CollectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectKind::Article => "article",
            CollectKind::Theme => "theme",
        }
    }
}

/// Outcome of a toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Toggle {
    #[serde(rename = "add")]
    Added,
    #[serde(rename = "cancel")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CollectRecord {
    pub user_id: String,
    pub target_id: String,
    pub collected_at: DateTime<Utc>,
}

/// A user's highlight on one position of an article.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(rename = "openId")]
    pub user_id: String,
    #[serde(rename = "pid")]
    pub article_id: String,
    pub dom_index: i64,
    pub text: String,
    pub note: String,
    #[serde(rename = "notedDate")]
    pub noted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNote {
    pub user_id: String,
    pub article_id: String,
    pub dom_index: i64,
    pub text: String,
    pub note: String,
}
