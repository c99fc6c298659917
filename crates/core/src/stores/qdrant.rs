use crate::models::{ChunkMetadata, IndexedChunk, RetrievalRecord, SearchQuery};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Extra hits requested per search page. Pages continue from the last offset
/// until `top_k` usable records are found or the collection runs out.
const OVERFETCH_FLOOR: usize = 4;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f64,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Debug, Deserialize)]
struct PointPayload {
    article_id: i64,
    chunk_index: usize,
    category: String,
    published_at: DateTime<Utc>,
    title: String,
    source: String,
    url: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    text: String,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    async fn search_page(&self, body: &Value) -> Result<Vec<ScoredPoint>, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.result)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::Request(format!(
                "qdrant collection setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn delete_article_points(&self, article_id: i64) -> Result<(), SearchError> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [{ "key": "article_id", "match": { "value": article_id } }]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }
}

/// Qdrant point ids must be integers or UUIDs, so the readable chunk id is
/// hashed into a stable UUID and kept in the payload.
pub fn point_id(chunk_id: &str) -> Uuid {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

fn backend_error(status: StatusCode) -> SearchError {
    SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

/// Hits without a payload or with blank text are not usable as context.
fn retrieval_record(hit: ScoredPoint) -> Option<RetrievalRecord> {
    let payload = hit.payload?;
    if payload.text.trim().is_empty() {
        return None;
    }
    Some(RetrievalRecord {
        article_id: payload.article_id,
        chunk_index: payload.chunk_index,
        metadata: ChunkMetadata {
            category: payload.category,
            published_at: payload.published_at,
            title: payload.title,
            source: payload.source,
            url: payload.url,
        },
        snippet: payload.snippet,
        document: payload.text,
        distance: (1.0 - hit.score) as f32,
        content: None,
    })
}

fn search_filter(query: &SearchQuery) -> Option<Value> {
    let mut must = Vec::new();

    if let Some(category) = &query.category {
        must.push(json!({ "key": "category", "match": { "value": category } }));
    }

    if query.published_from.is_some() || query.published_to.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(from) = query.published_from {
            range.insert("gte".to_string(), json!(from.timestamp_millis()));
        }
        if let Some(to) = query.published_to {
            range.insert("lte".to_string(), json!(to.timestamp_millis()));
        }
        must.push(json!({ "key": "published_ts", "range": range }));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
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

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                let payload = json!({
                    "chunk_id": chunk.chunk_id,
                    "article_id": article_id,
                    "chunk_index": chunk.chunk_index,
                    "category": chunk.metadata.category,
                    "published_at": chunk.metadata.published_at,
                    "published_ts": chunk.metadata.published_at.timestamp_millis(),
                    "title": chunk.metadata.title,
                    "source": chunk.metadata.source,
                    "url": chunk.metadata.url,
                    "snippet": chunk.snippet,
                    "text": chunk.text,
                });

                Ok(json!({
                    "id": point_id(&chunk.chunk_id).to_string(),
                    "vector": embedding,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        self.delete_article_points(article_id).await?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        query: &SearchQuery,
    ) -> Result<Vec<RetrievalRecord>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let page_size = query.top_k + query.top_k.max(OVERFETCH_FLOOR);
        let filter = search_filter(query);
        let mut records = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut body = json!({
                "vector": query_vector,
                "limit": page_size,
                "offset": offset,
                "with_payload": true,
            });
            if let Some(filter) = &filter {
                body["filter"] = filter.clone();
            }

            let hits = self.search_page(&body).await?;
            let returned = hits.len();
            records.extend(hits.into_iter().filter_map(retrieval_record));

            if records.len() >= query.top_k || returned < page_size {
                break;
            }
            offset += returned;
        }

        records.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        records.truncate(query.top_k);
        Ok(records)
    }
}
