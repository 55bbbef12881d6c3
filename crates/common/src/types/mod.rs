//! Core data model shared between the engine and collaborator clients
//!
//! The central type is [`Chunk`]: a scored unit of retrieved document text.
//! Chunks are created by retrieval calls, mutated only by the documented
//! boost/re-rank rules, and never persisted by this engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Where a chunk entered the pipeline from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// Full-corpus similarity search
    VectorFull,
    /// Similarity search scoped to entity-related documents
    VectorEntityFiltered,
    /// Full-document fetch requested by the sufficiency judge
    LlmRequestedFull,
}

/// Versioned document metadata attached to each chunk
///
/// Optional fields are modeled as `Option`, not probed at runtime; absent
/// values are absent, never defaulted into fake titles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Document title, when the source provided one
    pub title: Option<String>,

    /// Original filename
    pub filename: Option<String>,

    /// Document creation time
    pub created_at: Option<DateTime<Utc>>,

    /// Free-form string attributes (mailbox headers, categories, ...)
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl DocumentMeta {
    /// Best human-readable name: title, else filename, else a synthesized id
    pub fn display_title(&self, document_id: Uuid) -> String {
        self.title
            .clone()
            .or_else(|| self.filename.clone())
            .unwrap_or_else(|| format!("Document {}", document_id))
    }
}

/// A scored unit of retrieved evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk ID (unique within a retrieval batch)
    pub chunk_id: Uuid,

    /// Document this chunk belongs to
    pub document_id: Uuid,

    /// Chunk text content
    pub content: String,

    /// Position of the chunk within its document
    pub chunk_index: i32,

    /// Relevance score (0.0 - 1.0 from the index; boosts may push it above 1.0)
    pub score: f32,

    /// Retrieval source tag
    pub source: RetrievalSource,

    /// Document metadata snapshot
    #[serde(default)]
    pub meta: DocumentMeta,
}

/// Named entity extracted from query or document text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedEntity {
    /// Entity surface name
    pub name: String,

    /// Entity type label (person, organization, ...); best-effort
    pub entity_type: Option<String>,
}

/// Relationship triple from the entity graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

/// Page/segment coordinates for a chunk, when the source document has them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRef {
    /// 1-based page number
    pub page_number: Option<u32>,

    /// Bounding box on the page (x0, y0, x1, y1), normalized 0-1
    pub bounds: Option<[f32; 4]>,

    /// Segment type label (paragraph, table, heading, ...)
    pub segment_type: Option<String>,
}

/// User-facing evidence pointer from an answer back to its supporting chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Source document
    pub document_id: Uuid,

    /// Resolved document title (title, else filename, else synthesized)
    pub title: String,

    /// Supporting chunk; always present in the final chunk set
    pub chunk_id: Uuid,

    /// Relevance score of the supporting chunk
    pub relevance_score: f32,

    /// Bounded snippet of supporting text
    pub snippet: String,

    /// Sentence with the highest keyword overlap with the query
    pub highlight: Option<String>,

    /// Page/segment coordinates, when the document has layout data
    pub segment: Option<SegmentRef>,
}

/// Visibility scope for retrieval: per-user, per-team, and global collections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionScope {
    /// Requesting user, when the query is user-scoped
    pub user_id: Option<Uuid>,

    /// Teams whose collections are visible to this request
    #[serde(default)]
    pub team_ids: Vec<Uuid>,
}

impl CollectionScope {
    /// Global scope: no user/team restriction
    pub fn global() -> Self {
        Self::default()
    }
}
