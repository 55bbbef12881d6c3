//! Fused vector + graph retrieval
//!
//! The default recipe. Two search branches run concurrently:
//! - full-corpus similarity over the expanded query
//! - similarity restricted to documents the entity graph associates with
//!   the query's entities (direct mentions plus bounded hop traversal)
//!
//! Entity-branch chunks are tagged and boosted before the stable merge, so
//! the boost order is fixed: source boost, merge, importance re-rank,
//! dedup, sort, truncate. When both branches fail outright the recipe runs
//! one bare fallback search; this path never raises.

use corpusqa_common::types::{Chunk, CollectionScope, RetrievalSource};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{merge_first_wins, rerank, run_branch, RetrievalEngine, RetrievalOutcome};
use crate::preprocess::PreprocessedQuery;

impl RetrievalEngine {
    /// Hybrid retrieval: fused full-corpus and entity-filtered search
    pub async fn hybrid_retrieve(
        &self,
        query: &PreprocessedQuery,
        scope: &CollectionScope,
        token: &CancellationToken,
    ) -> RetrievalOutcome {
        let entities = &query.entities;
        let entity_docs = self.entity_documents(entities).await;

        let full_branch = run_branch("vector_full", token, async {
            self.vector
                .search_similar(
                    &query.expanded,
                    self.config.max_retrieval_results,
                    self.config.score_threshold,
                    scope,
                )
                .await
        });

        let entity_branch = run_branch("vector_entity", token, async {
            if entity_docs.is_empty() {
                return Ok(Vec::new());
            }
            self.vector
                .search_similar_in_documents(
                    &query.expanded,
                    &entity_docs,
                    self.config.max_entity_results,
                    self.config.score_threshold,
                )
                .await
        });

        let importance_lookup = async {
            if entities.is_empty() {
                return HashMap::new();
            }
            self.graph
                .get_entity_importance_scores(entities)
                .await
                .unwrap_or_default()
        };

        let ((full_chunks, full_failed), (entity_chunks, entity_failed), importance) =
            tokio::join!(full_branch, entity_branch, importance_lookup);

        // The full-corpus branch is the backbone; when it failed and the
        // entity branch produced nothing either, run the bare fallback.
        if full_failed && entity_chunks.is_empty() {
            info!(entity_failed, "Hybrid branches empty after failure, falling back to bare search");
            let chunks = self.fallback_search(&query.expanded, scope).await;
            return RetrievalOutcome {
                chunks,
                fell_back: true,
            };
        }

        let entity_chunks = self.tag_entity_branch(entity_chunks);
        debug!(
            full = full_chunks.len(),
            entity = entity_chunks.len(),
            entity_docs = entity_docs.len(),
            "Hybrid branches complete"
        );

        let merged = merge_first_wins(vec![full_chunks, entity_chunks]);
        let chunks = rerank::finalize(
            merged,
            entities,
            &importance,
            self.config.entity_boost_weight,
            self.dedup.as_ref(),
            self.config.final_result_limit,
        )
        .await;

        RetrievalOutcome {
            chunks,
            fell_back: false,
        }
    }

    /// Documents associated with the query entities: direct mentions plus
    /// hop-bounded traversal, de-duplicated, order preserved. Graph errors
    /// degrade to an empty set.
    pub(crate) async fn entity_documents(&self, entities: &[String]) -> Vec<Uuid> {
        if entities.is_empty() {
            return Vec::new();
        }

        let direct = self.graph.find_documents_by_entities(entities);
        let related = self
            .graph
            .find_related_documents_by_entities(entities, self.config.entity_hop_count);

        let (direct, related) = tokio::join!(direct, related);
        let direct = direct.unwrap_or_default();
        let related = related.unwrap_or_default();

        let mut seen = HashSet::new();
        direct
            .into_iter()
            .chain(related)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Tag and boost chunks arriving from the entity-filtered branch
    fn tag_entity_branch(&self, mut chunks: Vec<Chunk>) -> Vec<Chunk> {
        for chunk in &mut chunks {
            chunk.source = RetrievalSource::VectorEntityFiltered;
            chunk.score *= self.config.entity_source_boost;
        }
        chunks
    }
}
