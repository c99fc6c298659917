pub mod chunking;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod sources;
pub mod stores;
pub mod synthesis;
pub mod traits;

pub use chunking::{build_chunks, chunk_text, normalize_whitespace, ChunkingConfig, HtmlCleaner};
pub use context::{CitationMapping, ContextBuilder, GroundingContext, NO_RELEVANT_ARTICLES};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, RagError, SearchError, StoreError};
pub use events::{write_event_stream, QueryResponse, StreamEvent};
pub use ingest::{IngestionPipeline, IngestionReport, SkippedArticle, SkippedSource};
pub use models::{
    Article, ArticleCandidate, ArticleCreate, ChunkMetadata, IndexedChunk, QueryArticle, QueryFilters,
    RagSettings, RetrievalRecord, SearchQuery,
};
pub use orchestrator::{AnswerEvent, AnswerStream, QueryRequest, RagService};
pub use sources::{HackerNewsSource, NewsApiSource, RssSource};
pub use stores::{MemoryArticleStore, MemoryVectorIndex, QdrantStore};
pub use synthesis::{OpenAiSynthesizer, TokenStream};
pub use traits::{AnswerSynthesizer, ArticleSource, ArticleStore, VectorIndex};
