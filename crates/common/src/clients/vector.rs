//! Vector index client abstraction
//!
//! The engine never builds or updates the index; it only consumes three
//! read operations. Results are sorted by descending score, never exceed
//! the requested limit, and respect the caller's collection scope.

use crate::config::VectorServiceConfig;
use crate::errors::{EngineError, Result};
use crate::types::{Chunk, CollectionScope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Read-only similarity search surface of the vector index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Full-corpus similarity search, scoped to the caller's visible collections
    async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
        scope: &CollectionScope,
    ) -> Result<Vec<Chunk>>;

    /// Similarity search restricted to an explicit document set
    async fn search_similar_in_documents(
        &self,
        query: &str,
        document_ids: &[Uuid],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<Chunk>>;

    /// Every chunk for one document, ordered by chunk_index
    async fn get_all_document_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>>;
}

/// HTTP client for a remote vector index service
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    query: &'a str,
    limit: usize,
    score_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    team_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_ids: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
struct SearchResponse {
    chunks: Vec<Chunk>,
}

impl HttpVectorIndex {
    /// Create a new client against the configured service
    pub fn new(config: &VectorServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Configuration {
                message: format!("Failed to create vector index client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_search(&self, path: &str, body: &SearchBody<'_>) -> Result<Vec<Chunk>> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::VectorIndex {
                message: format!("Request to {} failed: {}", url, e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::VectorIndex {
                message: format!("Index error {}: {}", status, text),
            });
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|e| EngineError::VectorIndex {
                message: format!("Failed to parse index response: {}", e),
            })?;

        Ok(parsed.chunks)
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
        scope: &CollectionScope,
    ) -> Result<Vec<Chunk>> {
        self.post_search(
            "/v1/search",
            &SearchBody {
                query,
                limit,
                score_threshold,
                user_id: scope.user_id,
                team_ids: scope.team_ids.clone(),
                document_ids: None,
            },
        )
        .await
    }

    async fn search_similar_in_documents(
        &self,
        query: &str,
        document_ids: &[Uuid],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<Chunk>> {
        self.post_search(
            "/v1/search",
            &SearchBody {
                query,
                limit,
                score_threshold,
                user_id: None,
                team_ids: Vec::new(),
                document_ids: Some(document_ids.to_vec()),
            },
        )
        .await
    }

    async fn get_all_document_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let url = format!("{}/v1/documents/{}/chunks", self.base_url, document_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::VectorIndex {
                message: format!("Request to {} failed: {}", url, e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::VectorIndex {
                message: format!("Index error {}: {}", status, text),
            });
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|e| EngineError::VectorIndex {
                message: format!("Failed to parse chunk listing: {}", e),
            })?;

        let mut chunks = parsed.chunks;
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }
}

/// In-memory index for tests and development
///
/// Scoring is naive keyword overlap; good enough to exercise the pipeline
/// deterministically without a real index.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    documents: RwLock<HashMap<Uuid, Vec<Chunk>>>,
    /// When set, every search call fails; used to exercise fallback paths
    fail_searches: std::sync::atomic::AtomicBool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document's chunks (ordered by chunk_index)
    pub async fn insert_document(&self, document_id: Uuid, chunks: Vec<Chunk>) {
        self.documents.write().await.insert(document_id, chunks);
    }

    /// Force every search to fail
    pub fn fail_all_searches(&self, fail: bool) {
        self.fail_searches
            .store(fail, std::sync::atomic::Ordering::Relaxed);
    }

    fn overlap_score(query: &str, content: &str) -> f32 {
        let query_terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(|s| s.to_string())
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let content_lower = content.to_lowercase();
        let hits = query_terms
            .iter()
            .filter(|t| content_lower.contains(t.as_str()))
            .count();
        hits as f32 / query_terms.len() as f32
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
        document_filter: Option<&[Uuid]>,
    ) -> Result<Vec<Chunk>> {
        if self.fail_searches.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(EngineError::VectorIndex {
                message: "simulated index outage".to_string(),
            });
        }

        let docs = self.documents.read().await;
        let mut results: Vec<Chunk> = Vec::new();

        for (doc_id, chunks) in docs.iter() {
            if let Some(filter) = document_filter {
                if !filter.contains(doc_id) {
                    continue;
                }
            }
            for chunk in chunks {
                let score = Self::overlap_score(query, &chunk.content).max(chunk.score);
                if score >= score_threshold {
                    let mut hit = chunk.clone();
                    hit.score = score;
                    results.push(hit);
                }
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(limit);
        Ok(results)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
        _scope: &CollectionScope,
    ) -> Result<Vec<Chunk>> {
        self.search(query, limit, score_threshold, None).await
    }

    async fn search_similar_in_documents(
        &self,
        query: &str,
        document_ids: &[Uuid],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<Chunk>> {
        self.search(query, limit, score_threshold, Some(document_ids))
            .await
    }

    async fn get_all_document_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        if self.fail_searches.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(EngineError::VectorIndex {
                message: "simulated index outage".to_string(),
            });
        }
        let docs = self.documents.read().await;
        let mut chunks = docs.get(&document_id).cloned().unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }
}

/// Shared handle type used across the engine
pub type SharedVectorIndex = Arc<dyn VectorIndex>;
