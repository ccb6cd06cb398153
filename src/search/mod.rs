//! Search index adapter.
//!
//! The index only ranks: it answers a [`SearchQuery`] with article ids in rank
//! order and never returns document bodies.

mod elastic;
mod memory;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::Article;

pub use elastic::ElasticIndex;
pub use memory::MemoryIndex;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search service unavailable: {0}")]
    Unavailable(String),

    #[error("search service answered with status {0}")]
    Status(u16),

    #[error("malformed search response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Article ids matching `query`, best first.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError>;

    /// Add or replace one article.
    async fn index(&self, article: &Article) -> Result<(), SearchError>;
}

/// Push every article into `index`, returning how many were sent. Stops at
/// the first failure.
pub async fn reindex(index: &dyn SearchIndex, articles: &[Article]) -> Result<usize, SearchError> {
    for article in articles {
        index.index(article).await?;
    }
    Ok(articles.len())
}

/// Searchable text fields and their relevance boosts.
pub(crate) const FIELD_BOOSTS: [(&str, u32); 4] =
    [("title", 3), ("description", 2), ("tags", 2), ("body", 1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Relevance,
    DatePublished,
}

/// A conjunction of filters plus an optional keyword, paged with `from`/`size`.
///
/// Soft-deleted articles never match. An empty `feeds` list matches nothing;
/// an empty `kinds` list applies no type restriction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub feeds: Vec<String>,
    pub kinds: Vec<String>,
    pub keyword: Option<String>,
    pub exclude_ids: Vec<String>,
    pub from: usize,
    pub size: usize,
}

impl SearchQuery {
    pub fn keyword(&self) -> Option<&str> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|kw| !kw.is_empty())
    }

    /// Relevance first when there is a keyword, newest first always.
    pub fn sort(&self) -> Vec<SortKey> {
        match self.keyword() {
            Some(_) => vec![SortKey::Relevance, SortKey::DatePublished],
            None => vec![SortKey::DatePublished],
        }
    }

    /// Render as a search-service query body.
    pub fn to_dsl(&self) -> Value {
        let mut filter = vec![
            json!({ "term": { "isDel": false } }),
            json!({ "terms": { "feed": self.feeds } }),
        ];
        if !self.kinds.is_empty() {
            filter.push(json!({ "terms": { "type": self.kinds } }));
        }

        let mut bool_query = json!({ "filter": filter });
        if let Some(keyword) = self.keyword() {
            let fields: Vec<String> = FIELD_BOOSTS
                .iter()
                .map(|(field, boost)| format!("{}^{}", field, boost))
                .collect();
            bool_query["must"] = json!([{
                "multi_match": { "query": keyword, "fields": fields }
            }]);
        }
        if !self.exclude_ids.is_empty() {
            bool_query["must_not"] = json!([{ "ids": { "values": self.exclude_ids } }]);
        }

        let sort: Vec<Value> = self
            .sort()
            .into_iter()
            .map(|key| match key {
                SortKey::Relevance => json!({ "_score": { "order": "desc" } }),
                SortKey::DatePublished => json!({ "datePublished": { "order": "desc" } }),
            })
            .collect();

        json!({
            "query": { "bool": bool_query },
            "sort": sort,
            "from": self.from,
            "size": self.size,
            "_source": false,
        })
    }
}
