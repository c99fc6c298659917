use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("feed {feed} could not be parsed: {details}")]
    FeedParse { feed: String, details: String },

    #[error("source {source_name} returned {details}")]
    SourceResponse { source_name: String, details: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] SearchError),

    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid article: {0}")]
    InvalidArticle(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("answer generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Index(#[from] SearchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
