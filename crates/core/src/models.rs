use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A normalized article candidate as produced by a source. The url is the
/// identity key when it is written to the article store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleCreate {
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
    pub content: String,
    pub image_url: Option<String>,
}

pub type ArticleCandidate = ArticleCreate;

impl ArticleCreate {
    pub fn is_well_formed(&self) -> bool {
        !self.title.trim().is_empty() && url::Url::parse(self.url.trim()).is_ok()
    }
}

/// Article fields copied onto every chunk so retrieval never needs a join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub category: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub source: String,
    pub url: String,
}

impl From<&Article> for ChunkMetadata {
    fn from(article: &Article) -> Self {
        Self {
            category: article.category.clone(),
            published_at: article.published_at,
            title: article.title.clone(),
            source: article.source.clone(),
            url: article.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub article_id: i64,
    pub chunk_index: usize,
    pub text: String,
    pub snippet: String,
    pub metadata: ChunkMetadata,
}

pub fn chunk_id(article_id: i64, chunk_index: usize) -> String {
    format!("article-{article_id}-chunk-{chunk_index}")
}

/// One ranked hit for a single query. Lower distance is more similar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalRecord {
    pub article_id: i64,
    pub chunk_index: usize,
    pub metadata: ChunkMetadata,
    pub snippet: String,
    pub document: String,
    pub distance: f32,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct QueryFilters {
    pub category: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub top_k: usize,
    pub category: Option<String>,
    pub published_from: Option<DateTime<Utc>>,
    pub published_to: Option<DateTime<Utc>>,
}

impl SearchQuery {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            category: None,
            published_from: None,
            published_to: None,
        }
    }

    pub fn from_filters(top_k: usize, filters: &QueryFilters) -> Self {
        Self {
            top_k,
            category: filters.category.clone(),
            published_from: filters.date_from,
            published_to: filters.date_to,
        }
    }

    pub fn without_category(&self) -> Self {
        Self {
            category: None,
            ..self.clone()
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(category) = &self.category {
            if &metadata.category != category {
                return false;
            }
        }
        if let Some(from) = self.published_from {
            if metadata.published_at < from {
                return false;
            }
        }
        if let Some(to) = self.published_to {
            if metadata.published_at > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryArticle {
    pub id: i64,
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
}

impl From<&Article> for QueryArticle {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id,
            title: article.title.clone(),
            source: article.source.clone(),
            url: article.url.clone(),
            published_at: article.published_at,
            category: article.category.clone(),
        }
    }
}

/// Runtime knobs for ingestion and querying. Built once at startup and
/// handed to each component by reference.
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub snippet_chars: usize,
    pub top_k: usize,
    pub infer_category: bool,
    pub expand_query: bool,
    pub category_fallback: bool,
    pub hacker_news_limit: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            chunk_overlap: 120,
            snippet_chars: 400,
            top_k: 8,
            infer_category: true,
            expand_query: true,
            category_fallback: true,
            hacker_news_limit: 30,
        }
    }
}
