use crate::models::{IndexedChunk, RetrievalRecord, SearchQuery};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    chunk: IndexedChunk,
    vector: Vec<f32>,
}

/// Cosine-distance index held in memory, optionally snapshotted to JSON.
#[derive(Default)]
pub struct MemoryVectorIndex {
    points: RwLock<BTreeMap<String, StoredPoint>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path` if it exists; `save` writes back there.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SearchError> {
        let path = path.as_ref().to_path_buf();
        let points = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: Vec<StoredPoint> = serde_json::from_slice(&bytes)?;
                stored
                    .into_iter()
                    .map(|point| (point.chunk.chunk_id.clone(), point))
                    .collect()
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            points: RwLock::new(points),
            snapshot_path: Some(path),
        })
    }

    pub async fn save(&self) -> Result<(), SearchError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let bytes = {
            let points = self.points.read().await;
            serde_json::to_vec(&points.values().collect::<Vec<_>>())?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn chunk_ids_for(&self, article_id: i64) -> Vec<String> {
        self.points
            .read()
            .await
            .values()
            .filter(|point| point.chunk.article_id == article_id)
            .map(|point| point.chunk.chunk_id.clone())
            .collect()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert_article_chunks(
        &self,
        article_id: i64,
        chunks: &[IndexedChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        if chunks.len() != embeddings.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }
        if let Some(foreign) = chunks.iter().find(|chunk| chunk.article_id != article_id) {
            return Err(SearchError::Request(format!(
                "chunk {} does not belong to article {article_id}",
                foreign.chunk_id
            )));
        }

        let mut points = self.points.write().await;
        points.retain(|_, point| point.chunk.article_id != article_id);
        for (chunk, vector) in chunks.iter().zip(embeddings) {
            points.insert(
                chunk.chunk_id.clone(),
                StoredPoint {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                },
            );
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        query: &SearchQuery,
    ) -> Result<Vec<RetrievalRecord>, SearchError> {
        let points = self.points.read().await;

        let mut scored = Vec::new();
        for point in points.values() {
            if point.chunk.text.trim().is_empty() || !query.matches(&point.chunk.metadata) {
                continue;
            }
            if point.vector.len() != query_vector.len() {
                return Err(SearchError::Request(format!(
                    "query vector dim {} is not {}",
                    query_vector.len(),
                    point.vector.len()
                )));
            }
            scored.push((cosine_distance(query_vector, &point.vector), &point.chunk));
        }

        scored.sort_by(|left, right| {
            left.0
                .total_cmp(&right.0)
                .then_with(|| left.1.chunk_id.cmp(&right.1.chunk_id))
        });

        Ok(scored
            .into_iter()
            .take(query.top_k)
            .map(|(distance, chunk)| RetrievalRecord {
                article_id: chunk.article_id,
                chunk_index: chunk.chunk_index,
                metadata: chunk.metadata.clone(),
                snippet: chunk.snippet.clone(),
                document: chunk.text.clone(),
                distance,
                content: None,
            })
            .collect())
    }
}

fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        return 1.0;
    }
    1.0 - dot / (left_norm * right_norm)
}
