use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{SearchError, SearchIndex, SearchQuery};
use crate::models::Article;

/// Client for a JSON document-search service speaking the common
/// `_search` / `_doc` HTTP API.
pub struct ElasticIndex {
    client: Client,
    base_url: Url,
    index: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
}

impl ElasticIndex {
    pub fn new(base_url: &str, index: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("feedhub/0.1")
            .build()?;

        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("search url {} cannot carry a path", base_url);
        }

        Ok(Self {
            client,
            base_url,
            index: index.to_string(),
        })
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.index).extend(segments);
        }
        url
    }

    fn search_url(&self) -> Url {
        self.endpoint(&["_search"])
    }

    fn doc_url(&self, id: &str) -> Url {
        self.endpoint(&["_doc", id])
    }
}

fn unavailable(err: reqwest::Error) -> SearchError {
    SearchError::Unavailable(err.to_string())
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        let response = self
            .client
            .post(self.search_url())
            .json(&query.to_dsl())
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;

        let ids: Vec<String> = body.hits.hits.into_iter().map(|hit| hit.id).collect();
        debug!("search from={} size={} -> {} hits", query.from, query.size, ids.len());
        Ok(ids)
    }

    async fn index(&self, article: &Article) -> Result<(), SearchError> {
        let document = json!({
            "feed": article.feed,
            "title": article.title,
            "description": article.description,
            "tags": article.tags,
            "body": article.body,
            "datePublished": article.date_published,
            "isDel": article.is_del,
            "type": article.kind,
        });

        let response = self
            .client
            .put(self.doc_url(&article.id))
            .json(&document)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }
        Ok(())
    }
}
