use crate::error::{IngestError, RagError, SearchError, StoreError};
use crate::models::{Article, ArticleCandidate, ArticleCreate, IndexedChunk, RetrievalRecord, SearchQuery};
use crate::synthesis::TokenStream;
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replaces every chunk stored for `article_id` with `chunks`.
    async fn upsert_article_chunks(
        &self,
        article_id: i64,
        chunks: &[IndexedChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    /// Ranked by ascending distance. Records with blank document text are
    /// dropped and do not count toward `query.top_k`.
    async fn search_vector(
        &self,
        query_vector: &[f32],
        query: &SearchQuery,
    ) -> Result<Vec<RetrievalRecord>, SearchError>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn get_articles_by_ids(&self, ids: &[i64]) -> Result<Vec<Article>, StoreError>;

    async fn upsert_article_by_url(&self, article: ArticleCreate) -> Result<Article, StoreError>;
}

#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, RagError>;

    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<TokenStream, RagError>;
}

#[async_trait]
pub trait ArticleSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<ArticleCandidate>, IngestError>;
}
