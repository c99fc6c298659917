use crate::chunking::{build_chunks, chunk_text, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{Article, ArticleCandidate, RagSettings};
use crate::traits::{ArticleSource, ArticleStore, VectorIndex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedArticle {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub articles: usize,
    pub chunks: usize,
    pub skipped_sources: Vec<SkippedSource>,
    pub skipped_articles: Vec<SkippedArticle>,
}

impl IngestionReport {
    fn absorb(&mut self, other: IngestionReport) {
        self.articles += other.articles;
        self.chunks += other.chunks;
        self.skipped_sources.extend(other.skipped_sources);
        self.skipped_articles.extend(other.skipped_articles);
    }
}

pub struct IngestionPipeline<'a, E: ?Sized, V: ?Sized, A: ?Sized> {
    embedder: &'a E,
    index: &'a V,
    articles: &'a A,
    chunking: ChunkingConfig,
}

impl<'a, E, V, A> IngestionPipeline<'a, E, V, A>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
    A: ArticleStore + ?Sized,
{
    pub fn new(embedder: &'a E, index: &'a V, articles: &'a A, settings: &RagSettings) -> Self {
        Self {
            embedder,
            index,
            articles,
            chunking: ChunkingConfig::from(settings),
        }
    }

    /// Embeds the new chunk texts, then upserts the article and replaces its
    /// indexed chunks. Nothing is written when embedding fails. Returns the
    /// stored article and how many chunks now represent it.
    pub async fn ingest_article(&self, candidate: ArticleCandidate) -> Result<(Article, usize), IngestError> {
        let texts = chunk_text(&candidate.content, self.chunking);
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed(&texts)
                .await
                .map_err(|error| IngestError::EmbeddingUnavailable(error.to_string()))?
        };

        let article = self.articles.upsert_article_by_url(candidate).await?;
        let chunks = build_chunks(&article, self.chunking);

        self.index
            .upsert_article_chunks(article.id, &chunks, &embeddings)
            .await?;

        debug!(article_id = article.id, chunks = chunks.len(), url = %article.url, "indexed article");
        Ok((article, chunks.len()))
    }

    /// A failing article is recorded and skipped. Only an unavailable
    /// embedder stops the batch, since every later article would fail too.
    pub async fn ingest_articles(
        &self,
        candidates: Vec<ArticleCandidate>,
    ) -> Result<IngestionReport, (IngestionReport, IngestError)> {
        let mut report = IngestionReport::default();

        for candidate in candidates {
            let url = candidate.url.clone();
            match self.ingest_article(candidate).await {
                Ok((_, chunk_count)) => {
                    report.articles += 1;
                    report.chunks += chunk_count;
                }
                Err(error @ IngestError::EmbeddingUnavailable(_)) => return Err((report, error)),
                Err(error) => {
                    warn!(%url, %error, "skipping article");
                    report.skipped_articles.push(SkippedArticle {
                        url,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// One failing source is recorded and skipped; the others still run.
    pub async fn run(&self, sources: &[Box<dyn ArticleSource>]) -> IngestionReport {
        let mut report = IngestionReport::default();

        for source in sources {
            let name = source.name().to_string();
            let candidates = match source.fetch().await {
                Ok(candidates) => candidates,
                Err(error) => {
                    warn!(source = %name, %error, "source fetch failed");
                    report.skipped_sources.push(SkippedSource {
                        name,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            info!(source = %name, candidates = candidates.len(), "fetched");
            match self.ingest_articles(candidates).await {
                Ok(partial) => report.absorb(partial),
                Err((partial, error)) => {
                    warn!(source = %name, %error, ingested = partial.articles, "ingestion stopped early");
                    report.absorb(partial);
                    report.skipped_sources.push(SkippedSource {
                        name,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            articles = report.articles,
            chunks = report.chunks,
            skipped = report.skipped_sources.len(),
            "ingestion finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::RagError;
    use crate::models::SearchQuery;
    use crate::stores::{MemoryArticleStore, MemoryVectorIndex};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct StaticSource {
        name: &'static str,
        items: Vec<ArticleCandidate>,
    }

    #[async_trait]
    impl ArticleSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Vec<ArticleCandidate>, IngestError> {
            Ok(self.items.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl ArticleSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self) -> Result<Vec<ArticleCandidate>, IngestError> {
            Err(IngestError::SourceResponse {
                source_name: "broken".to_string(),
                details: "503 Service Unavailable".to_string(),
            })
        }
    }

    fn candidate(slug: &str, content: &str) -> ArticleCandidate {
        ArticleCandidate {
            title: format!("Story {slug}"),
            source: "Unit".to_string(),
            url: format!("https://example.com/{slug}"),
            published_at: Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(),
            category: "technology".to_string(),
            content: content.to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn reingesting_shorter_content_leaves_no_stale_chunks() -> Result<(), IngestError> {
        let embedder = CharacterNgramEmbedder::default();
        let index = MemoryVectorIndex::new();
        let store = MemoryArticleStore::new();
        let pipeline = IngestionPipeline::new(&embedder, &index, &store, &RagSettings::default());

        let (first, chunk_count) = pipeline.ingest_article(candidate("a", &"x".repeat(1000))).await?;
        assert_eq!(chunk_count, 2);

        let (second, chunk_count) = pipeline.ingest_article(candidate("a", "now a short body")).await?;
        assert_eq!(second.id, first.id);
        assert_eq!(chunk_count, 1);
        assert_eq!(index.chunk_ids_for(first.id).await, vec!["article-1-chunk-0".to_string()]);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_content_clears_the_article_from_the_index() -> Result<(), IngestError> {
        let embedder = CharacterNgramEmbedder::default();
        let index = MemoryVectorIndex::new();
        let store = MemoryArticleStore::new();
        let pipeline = IngestionPipeline::new(&embedder, &index, &store, &RagSettings::default());

        let (article, _) = pipeline.ingest_article(candidate("b", "some text")).await?;
        let (_, chunk_count) = pipeline.ingest_article(candidate("b", "   ")).await?;

        assert_eq!(chunk_count, 0);
        assert!(index.chunk_ids_for(article.id).await.is_empty());
        let vector = embedder.embed_one("some text");
        assert!(index.search_vector(&vector, &SearchQuery::new(5)).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failing_source_does_not_block_the_rest() {
        let embedder = CharacterNgramEmbedder::default();
        let index = MemoryVectorIndex::new();
        let store = MemoryArticleStore::new();
        let pipeline = IngestionPipeline::new(&embedder, &index, &store, &RagSettings::default());

        let sources: Vec<Box<dyn ArticleSource>> = vec![
            Box::new(BrokenSource),
            Box::new(StaticSource {
                name: "static",
                items: vec![candidate("c", "chip exports"), candidate("d", "robot vacuums")],
            }),
        ];
        let report = pipeline.run(&sources).await;

        assert_eq!(report.articles, 2);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.skipped_sources.len(), 1);
        assert_eq!(report.skipped_sources[0].name, "broken");
        assert!(report.skipped_sources[0].reason.contains("503"));
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            Err(RagError::EmbeddingUnavailable("429 Too Many Requests".to_string()))
        }
    }

    #[tokio::test]
    async fn embedding_failure_leaves_store_and_index_untouched() -> Result<(), IngestError> {
        let embedder = CharacterNgramEmbedder::default();
        let index = MemoryVectorIndex::new();
        let store = MemoryArticleStore::new();
        let settings = RagSettings::default();

        let (article, _) = IngestionPipeline::new(&embedder, &index, &store, &settings)
            .ingest_article(candidate("k", "old body text"))
            .await?;

        let failing = IngestionPipeline::new(&FailingEmbedder, &index, &store, &settings);
        let result = failing.ingest_article(candidate("k", "new body text")).await;
        assert!(matches!(result, Err(IngestError::EmbeddingUnavailable(_))));

        let stored = store.get_articles_by_ids(&[article.id]).await?;
        assert_eq!(stored[0].content, "old body text");
        let vector = embedder.embed_one("old body text");
        let hits = index.search_vector(&vector, &SearchQuery::new(1)).await?;
        assert_eq!(hits[0].document, "old body text");
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_embedder_stops_the_source() {
        let index = MemoryVectorIndex::new();
        let store = MemoryArticleStore::new();
        let pipeline = IngestionPipeline::new(&FailingEmbedder, &index, &store, &RagSettings::default());

        let sources: Vec<Box<dyn ArticleSource>> = vec![Box::new(StaticSource {
            name: "static",
            items: vec![candidate("m", "first"), candidate("n", "second")],
        })];
        let report = pipeline.run(&sources).await;

        assert_eq!(report.articles, 0);
        assert_eq!(report.skipped_sources.len(), 1);
        assert!(report.skipped_sources[0].reason.contains("429"));
        assert!(report.skipped_articles.is_empty());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn malformed_article_is_skipped_alone() {
        let embedder = CharacterNgramEmbedder::default();
        let index = MemoryVectorIndex::new();
        let store = MemoryArticleStore::new();
        let pipeline = IngestionPipeline::new(&embedder, &index, &store, &RagSettings::default());

        let mut bad = candidate("e", "body");
        bad.url = String::new();
        let sources: Vec<Box<dyn ArticleSource>> = vec![
            Box::new(StaticSource {
                name: "mixed",
                items: vec![candidate("f", "first body"), bad, candidate("g", "after the bad one")],
            }),
            Box::new(StaticSource {
                name: "clean",
                items: vec![candidate("h", "other body")],
            }),
        ];
        let report = pipeline.run(&sources).await;

        assert_eq!(report.articles, 3);
        assert!(report.skipped_sources.is_empty());
        assert_eq!(report.skipped_articles.len(), 1);
        assert!(report.skipped_articles[0].reason.contains("url is empty"));
        assert_eq!(store.len().await, 3);
    }
}
