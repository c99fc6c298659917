use async_trait::async_trait;
use newsiq_core::{
    AnswerSynthesizer, CharacterNgramEmbedder, Embedder, IndexedChunk, MemoryVectorIndex, OpenAiEmbedder,
    OpenAiSynthesizer, QdrantStore, RagError, RetrievalRecord, SearchError, SearchQuery, TokenStream,
    VectorIndex,
};

/// OpenAI embeddings when a key is configured, local n-gram vectors otherwise.
/// Ingest and ask must agree on the choice for the index to be usable.
pub enum EmbedderBackend {
    OpenAi(OpenAiEmbedder),
    Local(CharacterNgramEmbedder),
}

impl EmbedderBackend {
    pub fn label(&self) -> &'static str {
        match self {
            EmbedderBackend::OpenAi(_) => "openai",
            EmbedderBackend::Local(_) => "character-ngram",
        }
    }
}

#[async_trait]
impl Embedder for EmbedderBackend {
    fn dimensions(&self) -> usize {
        match self {
            EmbedderBackend::OpenAi(embedder) => embedder.dimensions(),
            EmbedderBackend::Local(embedder) => embedder.dimensions(),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        match self {
            EmbedderBackend::OpenAi(embedder) => embedder.embed(texts).await,
            EmbedderBackend::Local(embedder) => embedder.embed(texts).await,
        }
    }
}

pub enum IndexBackend {
    Memory(MemoryVectorIndex),
    Qdrant(QdrantStore),
}

impl IndexBackend {
    pub async fn persist(&self) -> Result<(), SearchError> {
        match self {
            IndexBackend::Memory(index) => index.save().await,
            IndexBackend::Qdrant(_) => Ok(()),
        }
    }
}

#[async_trait]
impl VectorIndex for IndexBackend {
    async fn upsert_article_chunks(
        &self,
        article_id: i64,
        chunks: &[IndexedChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        match self {
            IndexBackend::Memory(index) => index.upsert_article_chunks(article_id, chunks, embeddings).await,
            IndexBackend::Qdrant(index) => index.upsert_article_chunks(article_id, chunks, embeddings).await,
        }
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        query: &SearchQuery,
    ) -> Result<Vec<RetrievalRecord>, SearchError> {
        match self {
            IndexBackend::Memory(index) => index.search_vector(query_vector, query).await,
            IndexBackend::Qdrant(index) => index.search_vector(query_vector, query).await,
        }
    }
}

pub enum SynthesizerBackend {
    OpenAi(OpenAiSynthesizer),
    Unconfigured,
}

impl SynthesizerBackend {
    fn unconfigured() -> RagError {
        RagError::GenerationUnavailable("OPENAI_API_KEY is not set".to_string())
    }
}

#[async_trait]
impl AnswerSynthesizer for SynthesizerBackend {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, RagError> {
        match self {
            SynthesizerBackend::OpenAi(synthesizer) => synthesizer.generate(system_prompt, user_prompt).await,
            SynthesizerBackend::Unconfigured => Err(Self::unconfigured()),
        }
    }

    async fn generate_stream(&self, system_prompt: &str, user_prompt: &str) -> Result<TokenStream, RagError> {
        match self {
            SynthesizerBackend::OpenAi(synthesizer) => {
                synthesizer.generate_stream(system_prompt, user_prompt).await
            }
            SynthesizerBackend::Unconfigured => Err(Self::unconfigured()),
        }
    }
}
