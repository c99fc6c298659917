use crate::error::StoreError;
use crate::models::{Article, ArticleCreate};
use crate::traits::ArticleStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ArticleTable {
    next_id: i64,
    articles: BTreeMap<i64, Article>,
    #[serde(skip)]
    by_url: HashMap<String, i64>,
}

impl ArticleTable {
    fn reindex(&mut self) {
        self.by_url = self
            .articles
            .values()
            .map(|article| (article.url.clone(), article.id))
            .collect();
        let max_id = self.articles.keys().next_back().copied().unwrap_or(0);
        self.next_id = self.next_id.max(max_id + 1).max(1);
    }
}

/// Url-keyed article table with a JSON snapshot, standing in for the
/// relational store.
#[derive(Default)]
pub struct MemoryArticleStore {
    table: RwLock<ArticleTable>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut table = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<ArticleTable>(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => ArticleTable::default(),
            Err(error) => return Err(error.into()),
        };
        table.reindex();

        Ok(Self {
            table: RwLock::new(table),
            snapshot_path: Some(path),
        })
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(&*self.table.read().await)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.articles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn find_by_url(&self, url: &str) -> Option<Article> {
        let table = self.table.read().await;
        table
            .by_url
            .get(url.trim())
            .and_then(|id| table.articles.get(id))
            .cloned()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn get_articles_by_ids(&self, ids: &[i64]) -> Result<Vec<Article>, StoreError> {
        let table = self.table.read().await;
        let mut seen = HashSet::new();

        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| table.articles.get(id).cloned())
            .collect())
    }

    async fn upsert_article_by_url(&self, article: ArticleCreate) -> Result<Article, StoreError> {
        let url = article.url.trim().to_string();
        if url.is_empty() {
            return Err(StoreError::InvalidArticle("article url is empty".to_string()));
        }

        let mut table = self.table.write().await;
        let existing = table.by_url.get(&url).copied();

        let stored = match existing.and_then(|id| table.articles.get_mut(&id)) {
            Some(row) => {
                row.title = article.title;
                row.source = article.source;
                row.published_at = article.published_at;
                row.category = article.category;
                row.content = article.content;
                row.image_url = article.image_url;
                row.clone()
            }
            None => {
                let id = table.next_id.max(1);
                table.next_id = id + 1;
                let row = Article {
                    id,
                    title: article.title,
                    source: article.source,
                    url: url.clone(),
                    published_at: article.published_at,
                    category: article.category,
                    content: article.content,
                    image_url: article.image_url,
                    created_at: Utc::now(),
                };
                table.by_url.insert(url, id);
                table.articles.insert(id, row.clone());
                row
            }
        };

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, content: &str) -> ArticleCreate {
        ArticleCreate {
            title: "Headline".to_string(),
            source: "Unit".to_string(),
            url: url.to_string(),
            published_at: Utc::now(),
            category: "business".to_string(),
            content: content.to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn same_url_updates_the_existing_row() -> Result<(), StoreError> {
        let store = MemoryArticleStore::new();
        let first = store
            .upsert_article_by_url(candidate("https://example.com/a", "old"))
            .await?;
        let second = store
            .upsert_article_by_url(candidate("https://example.com/a", "new"))
            .await?;

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.content, "new");
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn lookup_skips_missing_and_duplicate_ids() -> Result<(), StoreError> {
        let store = MemoryArticleStore::new();
        let a = store.upsert_article_by_url(candidate("https://example.com/a", "a")).await?;
        let b = store.upsert_article_by_url(candidate("https://example.com/b", "b")).await?;

        let found = store.get_articles_by_ids(&[b.id, 999, a.id, b.id]).await?;

        assert_eq!(found.iter().map(|article| article.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_preserves_ids_across_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("articles.json");

        let store = MemoryArticleStore::open(&path).await?;
        let saved = store.upsert_article_by_url(candidate("https://example.com/a", "a")).await?;
        store.save().await?;

        let reopened = MemoryArticleStore::open(&path).await?;
        let again = reopened
            .upsert_article_by_url(candidate("https://example.com/a", "changed"))
            .await?;
        let fresh = reopened
            .upsert_article_by_url(candidate("https://example.com/b", "b"))
            .await?;

        assert_eq!(again.id, saved.id);
        assert_ne!(fresh.id, saved.id);
        Ok(())
    }
}
