pub mod articles;
pub mod memory;
pub mod qdrant;

pub use articles::MemoryArticleStore;
pub use memory::MemoryVectorIndex;
pub use qdrant::QdrantStore;
