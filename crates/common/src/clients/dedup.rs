//! Near-duplicate chunk removal
//!
//! Deduplication is a collaborator capability behind a trait so the
//! re-rank stage can swap in a remote service. The default implementation
//! keys chunks on normalized content and keeps the highest-scoring copy,
//! which is deterministic for identical inputs.

use crate::errors::Result;
use crate::types::Chunk;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Removes near-duplicate chunks from a candidate set
#[async_trait]
pub trait Deduplicator: Send + Sync {
    /// Return the deduplicated set; relative order of survivors is preserved
    async fn dedup(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>>;
}

/// Default deduplicator: normalized-content keying
///
/// Two chunks are duplicates when their lowercased, whitespace-collapsed
/// content prefixes match. The higher-scoring copy survives in the position
/// of the first occurrence.
pub struct ContentKeyDeduplicator {
    /// Characters of normalized content used as the identity key
    prefix_len: usize,
}

impl Default for ContentKeyDeduplicator {
    fn default() -> Self {
        Self { prefix_len: 240 }
    }
}

impl ContentKeyDeduplicator {
    pub fn new(prefix_len: usize) -> Self {
        Self { prefix_len }
    }

    fn key(&self, content: &str) -> String {
        let normalized: String = content
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        normalized.chars().take(self.prefix_len).collect()
    }
}

#[async_trait]
impl Deduplicator for ContentKeyDeduplicator {
    async fn dedup(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let mut slot_by_key: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let key = self.key(&chunk.content);
            match slot_by_key.get(&key) {
                Some(&slot) => {
                    if chunk.score > out[slot].score {
                        out[slot] = chunk;
                    }
                }
                None => {
                    slot_by_key.insert(key, out.len());
                    out.push(chunk);
                }
            }
        }

        Ok(out)
    }
}

/// Shared handle type used across the engine
pub type SharedDeduplicator = Arc<dyn Deduplicator>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentMeta, RetrievalSource};
    use uuid::Uuid;

    fn chunk(content: &str, score: f32) -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            content: content.to_string(),
            chunk_index: 0,
            score,
            source: RetrievalSource::VectorFull,
            meta: DocumentMeta::default(),
        }
    }

    #[tokio::test]
    async fn test_keeps_highest_scoring_copy() {
        let dedup = ContentKeyDeduplicator::default();
        let chunks = vec![
            chunk("The quick   brown fox", 0.5),
            chunk("the quick brown FOX", 0.9),
            chunk("something else entirely", 0.4),
        ];

        let out = dedup.dedup(chunks).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].score, 0.9);
        assert_eq!(out[1].content, "something else entirely");
    }

    #[tokio::test]
    async fn test_deterministic_for_same_input() {
        let dedup = ContentKeyDeduplicator::default();
        let chunks = vec![
            chunk("alpha beta", 0.3),
            chunk("alpha beta", 0.7),
            chunk("gamma", 0.5),
        ];

        let first = dedup.dedup(chunks.clone()).await.unwrap();
        let second = dedup.dedup(chunks).await.unwrap();

        let ids_a: Vec<_> = first.iter().map(|c| c.chunk_id).collect();
        let ids_b: Vec<_> = second.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids_a, ids_b);
    }
}
