//! Retrieval pipeline
//!
//! One `RetrievalEngine` owns the vector index and entity graph handles
//! and exposes strategy-shaped retrieval recipes:
//! - `hybrid` - fused full-corpus + entity-filtered search (the default)
//! - `metadata` / `entity` / `temporal` - specialized sub-term recipes
//! - `collection_sweep` - wide low-threshold sweep feeding iterative
//!   analysis
//!
//! Branch failures are values, not exceptions: a failed branch contributes
//! an empty result and the fan-in proceeds with whatever arrived. No recipe
//! ever returns more than `final_result_limit` chunks.

pub mod hybrid;
pub mod rerank;
pub mod strategies;

use corpusqa_common::clients::{
    ContentKeyDeduplicator, SharedDeduplicator, SharedEntityGraph, SharedVectorIndex,
};
use corpusqa_common::config::RetrievalConfig;
use corpusqa_common::errors::Result;
use corpusqa_common::types::{Chunk, CollectionScope};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::preprocess::PreprocessedQuery;
use crate::strategy::QueryStrategy;

/// Result of one retrieval call
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Final chunk set, deduplicated, re-ranked, within budget
    pub chunks: Vec<Chunk>,

    /// True when the recipe fell back to a bare similarity search
    pub fell_back: bool,
}

/// Strategy-shaped retrieval over the vector index and entity graph
pub struct RetrievalEngine {
    vector: SharedVectorIndex,
    graph: SharedEntityGraph,
    dedup: Option<SharedDeduplicator>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    /// Build a retrieval engine; dedup follows `config.dedup_enabled`
    pub fn new(vector: SharedVectorIndex, graph: SharedEntityGraph, config: RetrievalConfig) -> Self {
        let dedup: Option<SharedDeduplicator> = if config.dedup_enabled {
            Some(Arc::new(ContentKeyDeduplicator::default()))
        } else {
            None
        };

        Self {
            vector,
            graph,
            dedup,
            config,
        }
    }

    /// Swap in a different deduplicator
    pub fn with_deduplicator(mut self, dedup: SharedDeduplicator) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Dispatch to the recipe matching the chosen strategy
    pub async fn retrieve(
        &self,
        strategy: QueryStrategy,
        query: &PreprocessedQuery,
        scope: &CollectionScope,
        token: &CancellationToken,
    ) -> RetrievalOutcome {
        match strategy {
            QueryStrategy::Metadata => self.metadata_retrieve(query, scope, token).await,
            QueryStrategy::Entity => self.entity_retrieve(query, scope, token).await,
            QueryStrategy::Temporal => self.temporal_retrieve(query, scope, token).await,
            QueryStrategy::CollectionAnalysis(_) => self.collection_sweep(query, scope).await,
            QueryStrategy::Semantic => self.hybrid_retrieve(query, scope, token).await,
        }
    }

    /// Wide low-threshold sweep used by collection analysis
    ///
    /// Returns up to `fallback_limit` chunks without re-ranking; the
    /// iterative analyzer does its own grouping and budgeting downstream.
    pub async fn collection_sweep(
        &self,
        query: &PreprocessedQuery,
        scope: &CollectionScope,
    ) -> RetrievalOutcome {
        let result = self
            .vector
            .search_similar(&query.expanded, self.config.fallback_limit, 0.0, scope)
            .await;

        match result {
            Ok(chunks) => {
                debug!(chunks = chunks.len(), "Collection sweep complete");
                RetrievalOutcome {
                    chunks,
                    fell_back: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Collection sweep failed, returning empty set");
                RetrievalOutcome {
                    chunks: Vec::new(),
                    fell_back: true,
                }
            }
        }
    }

    /// Last-resort unscoped similarity search; never raises
    pub(crate) async fn fallback_search(
        &self,
        query: &str,
        scope: &CollectionScope,
    ) -> Vec<Chunk> {
        match self
            .vector
            .search_similar(
                query,
                self.config.fallback_limit,
                self.config.fallback_threshold,
                scope,
            )
            .await
        {
            Ok(mut chunks) => {
                chunks.truncate(self.config.final_result_limit);
                chunks
            }
            Err(e) => {
                warn!(error = %e, "Fallback search failed, returning empty set");
                Vec::new()
            }
        }
    }
}

/// Run one retrieval branch; failures and cancellation yield empty results
///
/// Returns the chunks plus whether the branch actually failed (as opposed
/// to legitimately finding nothing).
pub(crate) async fn run_branch<F>(
    name: &str,
    token: &CancellationToken,
    fut: F,
) -> (Vec<Chunk>, bool)
where
    F: Future<Output = Result<Vec<Chunk>>>,
{
    tokio::select! {
        _ = token.cancelled() => {
            debug!(branch = name, "Branch cancelled");
            (Vec::new(), false)
        }
        result = fut => match result {
            Ok(chunks) => {
                debug!(branch = name, chunks = chunks.len(), "Branch complete");
                (chunks, false)
            }
            Err(e) => {
                warn!(branch = name, error = %e, "Branch failed, continuing with empty result");
                (Vec::new(), true)
            }
        },
    }
}

/// Stable first-occurrence merge across ordered passes
///
/// Passes are consumed in the given order; within a pass, order is
/// preserved. The first chunk seen for a given chunk id wins and keeps its
/// position.
pub(crate) fn merge_first_wins(passes: Vec<Vec<Chunk>>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for pass in passes {
        for chunk in pass {
            if seen.insert(chunk.chunk_id) {
                merged.push(chunk);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusqa_common::types::{DocumentMeta, RetrievalSource};
    use uuid::Uuid;

    fn chunk(id: Uuid, score: f32) -> Chunk {
        Chunk {
            chunk_id: id,
            document_id: Uuid::new_v4(),
            content: "text".to_string(),
            chunk_index: 0,
            score,
            source: RetrievalSource::VectorFull,
            meta: DocumentMeta::default(),
        }
    }

    #[test]
    fn test_merge_first_wins_keeps_first_copy() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let first = vec![chunk(id, 0.9)];
        let second = vec![chunk(id, 0.4), chunk(other, 0.5)];

        let merged = merge_first_wins(vec![first, second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].chunk_id, id);
        assert_eq!(merged[0].score, 0.9);
        assert_eq!(merged[1].chunk_id, other);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let pass_a: Vec<Chunk> = ids.iter().map(|id| chunk(*id, 0.5)).collect();
        let pass_b: Vec<Chunk> = ids.iter().rev().map(|id| chunk(*id, 0.6)).collect();

        let once = merge_first_wins(vec![pass_a.clone(), pass_b.clone()]);
        let twice = merge_first_wins(vec![pass_a, pass_b]);

        let order_once: Vec<Uuid> = once.iter().map(|c| c.chunk_id).collect();
        let order_twice: Vec<Uuid> = twice.iter().map(|c| c.chunk_id).collect();
        assert_eq!(order_once, order_twice);
        assert_eq!(order_once, ids);
    }

    #[tokio::test]
    async fn test_run_branch_swallows_errors() {
        let token = CancellationToken::new();
        let (chunks, failed) = run_branch("test", &token, async {
            Err(corpusqa_common::errors::EngineError::VectorIndex {
                message: "down".to_string(),
            })
        })
        .await;

        assert!(chunks.is_empty());
        assert!(failed);
    }

    #[tokio::test]
    async fn test_run_branch_respects_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let (chunks, failed) = run_branch("test", &token, async {
            // Never completes; cancellation must win
            futures::future::pending::<Result<Vec<Chunk>>>().await
        })
        .await;

        assert!(chunks.is_empty());
        assert!(!failed);
    }
}
