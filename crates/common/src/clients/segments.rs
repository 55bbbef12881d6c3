//! Optional page/segment coordinate lookup
//!
//! Citations carry page coordinates when the source document has them.
//! Absence (or a lookup failure) must never fail the citation path, so the
//! engine only ever consumes this through `resolve_or_none`.

use crate::errors::{EngineError, Result};
use crate::types::SegmentRef;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Segment coordinate lookup
#[async_trait]
pub trait SegmentLookup: Send + Sync {
    /// Coordinates for one chunk; `None` when the document has no layout data
    async fn segment_for_chunk(&self, chunk_id: Uuid) -> Result<Option<SegmentRef>>;
}

/// Swallow lookup failures; citations degrade to no coordinates
pub async fn resolve_or_none(lookup: &dyn SegmentLookup, chunk_id: Uuid) -> Option<SegmentRef> {
    match lookup.segment_for_chunk(chunk_id).await {
        Ok(segment) => segment,
        Err(e) => {
            tracing::debug!(chunk_id = %chunk_id, error = %e, "Segment lookup failed, omitting coordinates");
            None
        }
    }
}

/// HTTP client for a remote segment lookup service
pub struct HttpSegmentLookup {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SegmentResponse {
    segment: Option<SegmentRef>,
}

impl HttpSegmentLookup {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EngineError::Configuration {
                message: format!("Failed to create segment lookup client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SegmentLookup for HttpSegmentLookup {
    async fn segment_for_chunk(&self, chunk_id: Uuid) -> Result<Option<SegmentRef>> {
        let url = format!("{}/v1/segments/{}", self.base_url, chunk_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::SegmentLookup {
                message: format!("Request to {} failed: {}", url, e),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            return Err(EngineError::SegmentLookup {
                message: format!("Segment service error {}", status),
            });
        }

        let parsed: SegmentResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::SegmentLookup {
                    message: format!("Failed to parse segment response: {}", e),
                })?;

        Ok(parsed.segment)
    }
}

/// In-memory lookup for tests; empty by default
#[derive(Default)]
pub struct InMemorySegmentLookup {
    segments: RwLock<HashMap<Uuid, SegmentRef>>,
}

impl InMemorySegmentLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, chunk_id: Uuid, segment: SegmentRef) {
        self.segments.write().await.insert(chunk_id, segment);
    }
}

#[async_trait]
impl SegmentLookup for InMemorySegmentLookup {
    async fn segment_for_chunk(&self, chunk_id: Uuid) -> Result<Option<SegmentRef>> {
        Ok(self.segments.read().await.get(&chunk_id).cloned())
    }
}

/// Shared handle type used across the engine
pub type SharedSegmentLookup = Arc<dyn SegmentLookup>;
