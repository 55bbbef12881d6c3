//! Specialized retrieval recipes
//!
//! Metadata, entity, and temporal queries each get their own recipe: a
//! primary search plus concurrent sub-term searches, merged first-wins with
//! the primary pass leading, then a strategy boost and the shared finalize
//! stage. Sub-terms are extracted with plain regexes from the query text.
//!
//! All recipes share the hybrid recipe's failure posture: branch failures
//! are empty results, and a dead primary branch with nothing else retrieved
//! drops to the bare fallback search.

use corpusqa_common::types::{Chunk, CollectionScope};
use futures::future::join_all;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{merge_first_wins, rerank, run_branch, RetrievalEngine, RetrievalOutcome};
use crate::preprocess::PreprocessedQuery;

/// Threshold for metadata recipes; header matches are often short text
const METADATA_THRESHOLD: f32 = 0.15;
/// Threshold for entity recipes; entity scoping already narrows the field
const ENTITY_THRESHOLD: f32 = 0.25;
/// Threshold for temporal recipes; date mentions score low semantically
const TEMPORAL_THRESHOLD: f32 = 0.15;

/// Boost applied per sub-term a chunk matches
const SUBTERM_BOOST: f32 = 0.1;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn quoted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)""#).unwrap())
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap())
}

fn iso_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}-\d{2}(-\d{2})?\b").unwrap())
}

fn capitalized_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?: [A-Z][a-z]+)*\b").unwrap())
}

const MONTH_NAMES: &[&str] = &[
    "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december",
];

/// Email addresses and quoted phrases from the query
fn metadata_subterms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = email_regex()
        .find_iter(query)
        .map(|m| m.as_str().to_string())
        .collect();

    for cap in quoted_regex().captures_iter(query) {
        if let Some(inner) = cap.get(1) {
            terms.push(inner.as_str().to_string());
        }
    }

    terms
}

/// Capitalized token sequences, excluding a leading sentence word
fn entity_subterms(query: &str) -> Vec<String> {
    capitalized_regex()
        .find_iter(query)
        .filter(|m| m.start() > 0)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Years, ISO dates, and month names from the (already expanded) query
fn temporal_subterms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = iso_date_regex()
        .find_iter(query)
        .map(|m| m.as_str().to_string())
        .collect();

    for m in year_regex().find_iter(query) {
        let year = m.as_str().to_string();
        if !terms.iter().any(|t| t.starts_with(&year)) {
            terms.push(year);
        }
    }

    let lower = query.to_lowercase();
    for month in MONTH_NAMES {
        if lower.contains(month) {
            terms.push((*month).to_string());
        }
    }

    terms
}

/// Additive boost for chunks matching extracted sub-terms
fn apply_subterm_boost(chunks: &mut [Chunk], terms: &[String]) {
    if terms.is_empty() {
        return;
    }
    let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

    for chunk in chunks.iter_mut() {
        let content = chunk.content.to_lowercase();
        let matches = lowered
            .iter()
            .filter(|t| {
                content.contains(t.as_str())
                    || chunk
                        .meta
                        .attributes
                        .values()
                        .any(|v| v.to_lowercase().contains(t.as_str()))
            })
            .count();

        if matches > 0 {
            chunk.score *= 1.0 + matches as f32 * SUBTERM_BOOST;
        }
    }
}

impl RetrievalEngine {
    /// Metadata recipe: header markers, addresses, quoted phrases
    pub async fn metadata_retrieve(
        &self,
        query: &PreprocessedQuery,
        scope: &CollectionScope,
        token: &CancellationToken,
    ) -> RetrievalOutcome {
        let terms = metadata_subterms(&query.original);
        self.subterm_recipe("metadata", query, terms, METADATA_THRESHOLD, scope, token)
            .await
    }

    /// Entity recipe: graph-scoped search plus capitalized name sub-terms
    pub async fn entity_retrieve(
        &self,
        query: &PreprocessedQuery,
        scope: &CollectionScope,
        token: &CancellationToken,
    ) -> RetrievalOutcome {
        let mut terms = entity_subterms(&query.original);
        for name in &query.entities {
            if !terms.iter().any(|t| t.eq_ignore_ascii_case(name)) {
                terms.push(name.clone());
            }
        }

        // Entity queries get the graph-scoped branch in front of the
        // generic sub-term fan-out.
        let entity_docs = self.entity_documents(&query.entities).await;
        if entity_docs.is_empty() {
            return self
                .subterm_recipe("entity", query, terms, ENTITY_THRESHOLD, scope, token)
                .await;
        }

        let scoped_branch = run_branch("entity_scoped", token, async {
            self.vector
                .search_similar_in_documents(
                    &query.expanded,
                    &entity_docs,
                    self.config.max_entity_results,
                    ENTITY_THRESHOLD,
                )
                .await
        });

        let full_branch = run_branch("entity_full", token, async {
            self.vector
                .search_similar(
                    &query.expanded,
                    self.config.max_retrieval_results,
                    ENTITY_THRESHOLD,
                    scope,
                )
                .await
        });

        let ((scoped, scoped_failed), (full, full_failed)) =
            tokio::join!(scoped_branch, full_branch);

        if scoped_failed && full_failed {
            let chunks = self.fallback_search(&query.expanded, scope).await;
            return RetrievalOutcome {
                chunks,
                fell_back: true,
            };
        }

        let mut merged = merge_first_wins(vec![scoped, full]);
        apply_subterm_boost(&mut merged, &terms);

        self.finalize_with_entities(merged, &query.entities).await
    }

    /// Temporal recipe: date/period sub-terms over the expanded query
    pub async fn temporal_retrieve(
        &self,
        query: &PreprocessedQuery,
        scope: &CollectionScope,
        token: &CancellationToken,
    ) -> RetrievalOutcome {
        let terms = temporal_subterms(&query.expanded);
        self.subterm_recipe("temporal", query, terms, TEMPORAL_THRESHOLD, scope, token)
            .await
    }

    /// Shared recipe skeleton: primary search plus one branch per sub-term
    async fn subterm_recipe(
        &self,
        name: &str,
        query: &PreprocessedQuery,
        terms: Vec<String>,
        threshold: f32,
        scope: &CollectionScope,
        token: &CancellationToken,
    ) -> RetrievalOutcome {
        let primary = run_branch(name, token, async {
            self.vector
                .search_similar(
                    &query.expanded,
                    self.config.max_retrieval_results,
                    threshold,
                    scope,
                )
                .await
        });

        let subterm_branches = join_all(terms.iter().map(|term| {
            run_branch("subterm", token, async move {
                self.vector
                    .search_similar(term, self.config.max_entity_results, threshold, scope)
                    .await
            })
        }));

        let ((primary_chunks, primary_failed), subterm_results) =
            tokio::join!(primary, subterm_branches);

        let mut passes = vec![primary_chunks];
        let mut any_subterm_chunks = false;
        for (chunks, _) in subterm_results {
            any_subterm_chunks |= !chunks.is_empty();
            passes.push(chunks);
        }

        if primary_failed && !any_subterm_chunks {
            let chunks = self.fallback_search(&query.expanded, scope).await;
            return RetrievalOutcome {
                chunks,
                fell_back: true,
            };
        }

        let mut merged = merge_first_wins(passes);
        debug!(recipe = name, merged = merged.len(), terms = terms.len(), "Recipe merged");
        apply_subterm_boost(&mut merged, &terms);

        self.finalize_with_entities(merged, &query.entities).await
    }

    /// Importance lookup plus the shared finalize pass
    async fn finalize_with_entities(
        &self,
        chunks: Vec<Chunk>,
        entities: &[String],
    ) -> RetrievalOutcome {
        let importance = if entities.is_empty() {
            HashMap::new()
        } else {
            self.graph
                .get_entity_importance_scores(entities)
                .await
                .unwrap_or_default()
        };

        let chunks = rerank::finalize(
            chunks,
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusqa_common::clients::{InMemoryEntityGraph, InMemoryVectorIndex};
    use corpusqa_common::config::RetrievalConfig;
    use corpusqa_common::types::{DocumentMeta, RetrievalSource};
    use std::sync::Arc;
    use uuid::Uuid;

    fn chunk(doc: Uuid, idx: i32, content: &str) -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            document_id: doc,
            content: content.to_string(),
            chunk_index: idx,
            score: 0.0,
            source: RetrievalSource::VectorFull,
            meta: DocumentMeta::default(),
        }
    }

    fn query(original: &str, expanded: &str, entities: &[&str]) -> PreprocessedQuery {
        PreprocessedQuery {
            original: original.to_string(),
            expanded: expanded.to_string(),
            entities: entities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_metadata_subterm_extraction() {
        let terms = metadata_subterms(r#"emails from alice@example.com about "budget review""#);
        assert!(terms.contains(&"alice@example.com".to_string()));
        assert!(terms.contains(&"budget review".to_string()));
    }

    #[test]
    fn test_entity_subterm_extraction_skips_sentence_start() {
        let terms = entity_subterms("Tell me about Marie Curie and Pierre");
        assert!(terms.contains(&"Marie Curie".to_string()));
        assert!(terms.contains(&"Pierre".to_string()));
        assert!(!terms.contains(&"Tell".to_string()));
    }

    #[test]
    fn test_temporal_subterm_extraction() {
        let terms = temporal_subterms("what happened yesterday 2025-06-01 and in 2023");
        assert!(terms.contains(&"2025-06-01".to_string()));
        assert!(terms.contains(&"2023".to_string()));
    }

    #[tokio::test]
    async fn test_temporal_recipe_finds_dated_chunks() {
        let vector = Arc::new(InMemoryVectorIndex::new());
        let graph = Arc::new(InMemoryEntityGraph::new());
        let doc = Uuid::new_v4();

        vector
            .insert_document(
                doc,
                vec![
                    chunk(doc, 0, "incident report filed 2025-06-01 in the morning"),
                    chunk(doc, 1, "general maintenance log entry"),
                ],
            )
            .await;

        let engine = RetrievalEngine::new(vector, graph, RetrievalConfig::default());
        let token = CancellationToken::new();

        let outcome = engine
            .temporal_retrieve(
                &query(
                    "what happened yesterday",
                    "what happened yesterday 2025-06-01",
                    &[],
                ),
                &CollectionScope::global(),
                &token,
            )
            .await;

        assert!(!outcome.fell_back);
        assert!(!outcome.chunks.is_empty());
        assert!(outcome.chunks[0].content.contains("2025-06-01"));
    }

    #[tokio::test]
    async fn test_recipe_failure_falls_back() {
        let vector = Arc::new(InMemoryVectorIndex::new());
        let graph = Arc::new(InMemoryEntityGraph::new());
        vector.fail_all_searches(true);

        let engine = RetrievalEngine::new(vector, graph, RetrievalConfig::default());
        let token = CancellationToken::new();

        let outcome = engine
            .metadata_retrieve(
                &query("emails from alice@example.com", "emails from alice@example.com", &[]),
                &CollectionScope::global(),
                &token,
            )
            .await;

        assert!(outcome.fell_back);
        assert!(outcome.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_entity_recipe_prefers_graph_scoped_documents() {
        let vector = Arc::new(InMemoryVectorIndex::new());
        let graph = Arc::new(InMemoryEntityGraph::new());

        let curie_doc = Uuid::new_v4();
        let noise_doc = Uuid::new_v4();

        vector
            .insert_document(
                curie_doc,
                vec![chunk(curie_doc, 0, "Marie Curie pioneered radioactivity research")],
            )
            .await;
        vector
            .insert_document(
                noise_doc,
                vec![chunk(noise_doc, 0, "research funding application guide")],
            )
            .await;

        graph.add_entity("Marie Curie", vec![curie_doc], 2.0).await;

        let engine = RetrievalEngine::new(vector, graph, RetrievalConfig::default());
        let token = CancellationToken::new();

        let outcome = engine
            .entity_retrieve(
                &query(
                    "who is Marie Curie",
                    "who is Marie Curie",
                    &["Marie Curie"],
                ),
                &CollectionScope::global(),
                &token,
            )
            .await;

        assert!(!outcome.chunks.is_empty());
        assert_eq!(outcome.chunks[0].document_id, curie_doc);
    }
}
