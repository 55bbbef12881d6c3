//! Full-document expansion
//!
//! When the sufficiency judge declares the chunk set insufficient, this
//! stage pulls whole documents into context. Two entry paths:
//! - explicit: the judge named documents; fetch them in full
//! - automatic: discover candidates from the entity graph, a broad
//!   similarity probe, and headline-style pattern probes
//!
//! Judge-requested documents are always kept whole; the iterative
//! analyzer's own valves handle oversized requests downstream. Discovered
//! candidates pass through the escalation ceiling instead: a candidate set
//! no subset can bring under the ceiling abandons the expansion entirely
//! and the original chunks are kept. Expansion never raises; every failure
//! path returns the initial chunks unchanged.

use corpusqa_common::clients::{SharedEntityGraph, SharedVectorIndex};
use corpusqa_common::config::ExpansionConfig;
use corpusqa_common::metrics::record_escalation;
use corpusqa_common::types::{Chunk, CollectionScope, RetrievalSource};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of an expansion attempt
#[derive(Debug, Clone)]
pub struct ExpansionResult {
    /// Working chunk set after expansion (or the original set when
    /// expansion was abandoned)
    pub chunks: Vec<Chunk>,

    /// Combined set exceeds direct processing; route to iterative analysis
    pub use_iterative: bool,

    /// Whether any full documents were actually pulled in
    pub escalated: bool,
}

impl ExpansionResult {
    fn unchanged(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            use_iterative: false,
            escalated: false,
        }
    }
}

/// Pulls whole documents into context under hard ceilings
pub struct DocumentExpander {
    vector: SharedVectorIndex,
    graph: SharedEntityGraph,
    config: ExpansionConfig,
}

const HEADLINE_PROBE_TERMS: &[&str] = &["headline", "headlines", "top stories", "news summary"];
const HEADLINE_PROBE_QUERY: &str = "news headlines breaking stories";

impl DocumentExpander {
    pub fn new(
        vector: SharedVectorIndex,
        graph: SharedEntityGraph,
        config: ExpansionConfig,
    ) -> Self {
        Self {
            vector,
            graph,
            config,
        }
    }

    /// Expand toward full documents; total, never raises
    pub async fn expand(
        &self,
        query: &str,
        initial: Vec<Chunk>,
        requested: &[Uuid],
        entities: &[String],
        scope: &CollectionScope,
    ) -> ExpansionResult {
        let (candidates, discovered) = if requested.is_empty() {
            let found = self
                .discover_candidates(query, &initial, entities, scope)
                .await;
            (found, true)
        } else {
            (requested.to_vec(), false)
        };

        if candidates.is_empty() {
            debug!("No expansion candidates, keeping retrieved set");
            return ExpansionResult::unchanged(initial);
        }

        match self
            .fetch_and_combine(initial.clone(), &candidates, discovered)
            .await
        {
            Some(result) => result,
            None => {
                record_escalation("abandoned");
                info!(candidates = candidates.len(), "Expansion abandoned, keeping retrieved set");
                ExpansionResult::unchanged(initial)
            }
        }
    }

    /// Candidate documents when the judge named none: entity graph
    /// membership, document ids behind the top retrieved chunks, and a
    /// pattern probe for headline-style queries. Bounded by
    /// `max_auto_documents`.
    async fn discover_candidates(
        &self,
        query: &str,
        initial: &[Chunk],
        entities: &[String],
        scope: &CollectionScope,
    ) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        if !entities.is_empty() {
            match self.graph.find_documents_by_entities(entities).await {
                Ok(docs) => {
                    for doc in docs {
                        if seen.insert(doc) {
                            candidates.push(doc);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Entity candidate lookup failed"),
            }
        }

        for chunk in initial.iter().take(self.config.discovery_search_limit) {
            if seen.insert(chunk.document_id) {
                candidates.push(chunk.document_id);
            }
        }

        let lower = query.to_lowercase();
        if HEADLINE_PROBE_TERMS.iter().any(|t| lower.contains(t)) {
            match self
                .vector
                .search_similar(
                    HEADLINE_PROBE_QUERY,
                    self.config.discovery_search_limit,
                    0.1,
                    scope,
                )
                .await
            {
                Ok(hits) => {
                    for hit in hits {
                        if seen.insert(hit.document_id) {
                            candidates.push(hit.document_id);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Headline probe failed"),
            }
        }

        candidates.truncate(self.config.max_auto_documents);
        candidates
    }

    /// Fetch candidate documents and combine with the initial set.
    /// `None` means expansion was abandoned.
    async fn fetch_and_combine(
        &self,
        initial: Vec<Chunk>,
        candidates: &[Uuid],
        discovered: bool,
    ) -> Option<ExpansionResult> {
        let fetches = futures::future::join_all(
            candidates
                .iter()
                .map(|doc| self.fetch_document_chunks(*doc)),
        )
        .await;

        let mut documents: Vec<(Uuid, Vec<Chunk>)> = Vec::new();
        for (doc, chunks) in candidates.iter().zip(fetches) {
            match chunks {
                Some(chunks) if !chunks.is_empty() => documents.push((*doc, chunks)),
                Some(_) => debug!(document = %doc, "Candidate document has no chunks"),
                None => {} // fetch failure already logged
            }
        }

        if documents.is_empty() {
            return None;
        }

        // Explicitly requested documents are kept whole; only discovered
        // candidates pass through the escalation valve. Greedy fill,
        // smallest documents first: a smallest document that alone
        // overflows the valve means no subset fits.
        let admitted: Vec<(Uuid, Vec<Chunk>)> = if discovered {
            documents.sort_by_key(|(_, chunks)| chunks.len());

            let mut total = 0usize;
            let mut kept = Vec::new();
            for (doc, chunks) in documents {
                if total + chunks.len() > self.config.escalation_ceiling {
                    debug!(document = %doc, chunks = chunks.len(), "Document over remaining valve budget");
                    continue;
                }
                total += chunks.len();
                kept.push((doc, chunks));
            }
            kept
        } else {
            documents
        };

        if admitted.is_empty() {
            return None;
        }

        let admitted_ids: HashSet<Uuid> = admitted.iter().map(|(doc, _)| *doc).collect();

        let mut combined: Vec<Chunk> = Vec::new();
        for (_, mut chunks) in admitted {
            for chunk in &mut chunks {
                chunk.source = RetrievalSource::LlmRequestedFull;
                chunk.score = 1.0;
            }
            combined.extend(chunks);
        }

        // Initial chunks from non-admitted documents ride along, best first,
        // filling what remains of the iterative ceiling.
        let mut riders: Vec<Chunk> = initial
            .into_iter()
            .filter(|c| !admitted_ids.contains(&c.document_id))
            .collect();
        riders.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let room = self.config.iterative_ceiling.saturating_sub(combined.len());
        combined.extend(riders.into_iter().take(room));

        let use_iterative = combined.len() > self.config.direct_limit;
        record_escalation(if use_iterative { "iterative" } else { "direct" });
        debug!(
            combined = combined.len(),
            use_iterative, "Expansion complete"
        );

        Some(ExpansionResult {
            chunks: combined,
            use_iterative,
            escalated: true,
        })
    }

    async fn fetch_document_chunks(&self, document_id: Uuid) -> Option<Vec<Chunk>> {
        match self.vector.get_all_document_chunks(document_id).await {
            Ok(chunks) => Some(chunks),
            Err(e) => {
                warn!(document = %document_id, error = %e, "Full document fetch failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusqa_common::clients::{InMemoryEntityGraph, InMemoryVectorIndex};
    use corpusqa_common::types::DocumentMeta;
    use std::sync::Arc;

    fn chunk(doc: Uuid, idx: i32, content: &str, score: f32) -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            document_id: doc,
            content: content.to_string(),
            chunk_index: idx,
            score,
            source: RetrievalSource::VectorFull,
            meta: DocumentMeta::default(),
        }
    }

    fn doc_with_chunks(n: usize) -> (Uuid, Vec<Chunk>) {
        let doc = Uuid::new_v4();
        let chunks = (0..n)
            .map(|i| chunk(doc, i as i32, &format!("section {} body text", i), 0.4))
            .collect();
        (doc, chunks)
    }

    async fn expander_with(
        docs: &[(Uuid, Vec<Chunk>)],
    ) -> (DocumentExpander, Arc<InMemoryEntityGraph>) {
        let vector = Arc::new(InMemoryVectorIndex::new());
        let graph = Arc::new(InMemoryEntityGraph::new());
        for (doc, chunks) in docs {
            vector.insert_document(*doc, chunks.clone()).await;
        }
        (
            DocumentExpander::new(vector, graph.clone(), ExpansionConfig::default()),
            graph,
        )
    }

    #[tokio::test]
    async fn test_requested_documents_fetched_in_full() {
        let (doc, chunks) = doc_with_chunks(10);
        let (expander, _) = expander_with(&[(doc, chunks.clone())]).await;

        let initial = vec![chunks[0].clone()];
        let result = expander
            .expand("query", initial, &[doc], &[], &CollectionScope::global())
            .await;

        assert!(result.escalated);
        assert!(!result.use_iterative);
        assert_eq!(result.chunks.len(), 10);
        assert!(result
            .chunks
            .iter()
            .all(|c| c.source == RetrievalSource::LlmRequestedFull && c.score == 1.0));
    }

    #[tokio::test]
    async fn test_requested_mixed_sizes_kept_whole_and_routed_to_iterative() {
        // 10 + 60 + 250 chunks, all named by the judge: every requested
        // document is kept in full and the combined 320 chunks route to
        // iterative analysis, whose per-document cap deals with the 250.
        let (small, small_chunks) = doc_with_chunks(10);
        let (medium, medium_chunks) = doc_with_chunks(60);
        let (large, large_chunks) = doc_with_chunks(250);

        let (expander, _) = expander_with(&[
            (small, small_chunks),
            (medium, medium_chunks),
            (large, large_chunks),
        ])
        .await;

        let result = expander
            .expand(
                "query",
                Vec::new(),
                &[small, medium, large],
                &[],
                &CollectionScope::global(),
            )
            .await;

        assert!(result.escalated);
        assert!(result.use_iterative);
        assert_eq!(result.chunks.len(), 320);
        assert_eq!(
            result
                .chunks
                .iter()
                .filter(|c| c.document_id == large)
                .count(),
            250
        );
    }

    #[tokio::test]
    async fn test_oversized_requested_document_is_not_dropped() {
        let (large, large_chunks) = doc_with_chunks(450);
        let (expander, _) = expander_with(&[(large, large_chunks)]).await;

        let result = expander
            .expand("query", Vec::new(), &[large], &[], &CollectionScope::global())
            .await;

        assert!(result.escalated);
        assert!(result.use_iterative);
        assert_eq!(result.chunks.len(), 450);
        assert!(result
            .chunks
            .iter()
            .all(|c| c.source == RetrievalSource::LlmRequestedFull));
    }

    #[tokio::test]
    async fn test_discovery_valve_excludes_oversized_candidate() {
        let (small, small_chunks) = doc_with_chunks(10);
        let (medium, medium_chunks) = doc_with_chunks(60);
        let (large, large_chunks) = doc_with_chunks(250);

        let (expander, _) = expander_with(&[
            (small, small_chunks.clone()),
            (medium, medium_chunks.clone()),
            (large, large_chunks.clone()),
        ])
        .await;

        let config = ExpansionConfig {
            escalation_ceiling: 300,
            ..ExpansionConfig::default()
        };
        let expander = DocumentExpander {
            config,
            ..expander
        };

        // No judge request; candidates come from the initial chunks
        let initial = vec![
            small_chunks[0].clone(),
            medium_chunks[0].clone(),
            large_chunks[0].clone(),
        ];
        let result = expander
            .expand("query", initial, &[], &[], &CollectionScope::global())
            .await;

        assert!(result.escalated);
        assert!(result.use_iterative);
        // 10 + 60 full chunks plus the one initial chunk riding along from
        // the excluded document
        assert_eq!(
            result
                .chunks
                .iter()
                .filter(|c| c.source == RetrievalSource::LlmRequestedFull)
                .count(),
            70
        );
        assert_eq!(
            result
                .chunks
                .iter()
                .filter(|c| c.document_id == large)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_oversized_only_discovery_candidate_abandons_expansion() {
        let (large, large_chunks) = doc_with_chunks(450);
        let (expander, _) = expander_with(&[(large, large_chunks.clone())]).await;

        let initial = vec![large_chunks[0].clone()];
        let result = expander
            .expand("query", initial.clone(), &[], &[], &CollectionScope::global())
            .await;

        assert!(!result.escalated);
        assert!(!result.use_iterative);
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk_id, initial[0].chunk_id);
    }

    #[tokio::test]
    async fn test_auto_discovery_uses_entity_graph() {
        let (doc, chunks) = doc_with_chunks(8);
        let (expander, graph) = expander_with(&[(doc, chunks)]).await;
        graph.add_entity("Alice", vec![doc], 1.5).await;

        let result = expander
            .expand(
                "everything about Alice",
                Vec::new(),
                &[],
                &["Alice".to_string()],
                &CollectionScope::global(),
            )
            .await;

        assert!(result.escalated);
        assert_eq!(result.chunks.len(), 8);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_initial_chunks() {
        let vector = Arc::new(InMemoryVectorIndex::new());
        let graph = Arc::new(InMemoryEntityGraph::new());
        vector.fail_all_searches(true);

        let expander =
            DocumentExpander::new(vector, graph, ExpansionConfig::default());

        let initial = vec![chunk(Uuid::new_v4(), 0, "evidence", 0.7)];
        let result = expander
            .expand(
                "query",
                initial.clone(),
                &[Uuid::new_v4()],
                &[],
                &CollectionScope::global(),
            )
            .await;

        assert!(!result.escalated);
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk_id, initial[0].chunk_id);
    }
}
