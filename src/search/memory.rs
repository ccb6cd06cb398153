use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{SearchError, SearchIndex, SearchQuery, FIELD_BOOSTS};
use crate::models::Article;

/// In-process index with the same filters, boosts and sort order as the
/// search service. Scores are boosted term frequencies.
#[derive(Default)]
pub struct MemoryIndex {
    docs: RwLock<HashMap<String, IndexedDoc>>,
}

struct IndexedDoc {
    id: String,
    feed: String,
    kind: String,
    is_del: bool,
    date_published: Option<DateTime<Utc>>,
    /// Term frequencies per field, paired with the field boost
    fields: Vec<(u32, HashMap<String, u32>)>,
}

impl IndexedDoc {
    fn from_article(article: &Article) -> Self {
        let tags = article.tags.join(" ");
        let fields = FIELD_BOOSTS
            .iter()
            .map(|(field, boost)| {
                let text = match *field {
                    "title" => article.title.as_str(),
                    "description" => article.description.as_str(),
                    "tags" => tags.as_str(),
                    _ => article.body.as_str(),
                };
                (*boost, term_frequencies(text))
            })
            .collect();

        Self {
            id: article.id.clone(),
            feed: article.feed.clone(),
            kind: article.kind.clone(),
            is_del: article.is_del,
            date_published: article.date_published,
            fields,
        }
    }

    fn score(&self, terms: &[String]) -> u32 {
        terms
            .iter()
            .map(|term| {
                self.fields
                    .iter()
                    .map(|(boost, freqs)| boost * freqs.get(term).copied().unwrap_or(0))
                    .sum::<u32>()
            })
            .sum()
    }

    fn passes_filters(&self, query: &SearchQuery) -> bool {
        !self.is_del
            && query.feeds.contains(&self.feed)
            && (query.kinds.is_empty() || query.kinds.contains(&self.kind))
            && !query.exclude_ids.contains(&self.id)
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut freqs = HashMap::new();
    for token in tokenize(text) {
        *freqs.entry(token).or_insert(0) += 1;
    }
    freqs
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_articles(articles: &[Article]) -> Self {
        let index = Self::new();
        {
            let mut docs = index.docs.write().await;
            for article in articles {
                docs.insert(article.id.clone(), IndexedDoc::from_article(article));
            }
        }
        index
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        let terms = query.keyword().map(tokenize);
        // A keyword with no searchable tokens matches nothing.
        if matches!(&terms, Some(t) if t.is_empty()) {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().await;
        let mut hits: Vec<(u32, &IndexedDoc)> = docs
            .values()
            .filter(|doc| doc.passes_filters(query))
            .filter_map(|doc| match &terms {
                Some(terms) => {
                    let score = doc.score(terms);
                    (score > 0).then_some((score, doc))
                }
                None => Some((0, doc)),
            })
            .collect();

        hits.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .cmp(score_a)
                .then_with(|| b.date_published.cmp(&a.date_published))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(hits
            .into_iter()
            .skip(query.from)
            .take(query.size)
            .map(|(_, doc)| doc.id.clone())
            .collect())
    }

    async fn index(&self, article: &Article) -> Result<(), SearchError> {
        self.docs
            .write()
            .await
            .insert(article.id.clone(), IndexedDoc::from_article(article));
        Ok(())
    }
}
