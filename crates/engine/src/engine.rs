//! Query engine orchestration
//!
//! `QueryEngine::answer` is the one public entry point and it is total:
//! every collaborator failure is absorbed by the stage that owns it, and
//! the worst outcome is a degraded answer with empty citations. The
//! pipeline runs preprocess, strategy selection, retrieval, sufficiency
//! assessment, optional expansion, optional iterative analysis, citation
//! building, and composition, then appends the turn to the rolling
//! conversation history.

use chrono::Utc;
use corpusqa_common::clients::{
    SharedCompletionClient, SharedEntityGraph, SharedSegmentLookup, SharedVectorIndex,
};
use corpusqa_common::config::EngineConfig;
use corpusqa_common::history::{ConversationEntry, SharedConversationStore};
use corpusqa_common::metrics::{record_retrieval, QueryMetrics};
use corpusqa_common::types::{Citation, CollectionScope};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::citation::CitationBuilder;
use crate::compose::{ResponseComposer, ANSWER_UNAVAILABLE};
use crate::expand::DocumentExpander;
use crate::iterative::IterativeAnalyzer;
use crate::preprocess::{preprocess, PreprocessedQuery};
use crate::retrieval::RetrievalEngine;
use crate::strategy::{CollectionAnalysisMode, KeywordClassifier, QueryClassifier, QueryStrategy};
use crate::sufficiency::{Sufficiency, SufficiencyAssessor};

/// One query against the engine
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Conversation session; history is keyed on this
    pub session_id: Uuid,

    /// Raw query text
    pub query: String,

    /// Collections visible to this request
    pub scope: CollectionScope,
}

impl QueryRequest {
    pub fn new(session_id: Uuid, query: impl Into<String>) -> Self {
        Self {
            session_id,
            query: query.into(),
            scope: CollectionScope::global(),
        }
    }

    pub fn with_scope(mut self, scope: CollectionScope) -> Self {
        self.scope = scope;
        self
    }
}

/// What the pipeline did for one query, for logging and clients that
/// surface processing detail
#[derive(Debug, Clone, Default)]
pub struct EngineDiagnostics {
    pub strategy: String,
    pub collection_mode: Option<String>,
    pub retrieval_fell_back: bool,
    pub sufficiency: Option<String>,
    pub decision_path: Option<String>,
    pub escalated: bool,
    pub used_iterative: bool,
    pub degraded: bool,
    pub cancelled: bool,
    pub chunk_count: usize,
    pub documents_processed: usize,
    pub documents_skipped: usize,
    pub duration_ms: u64,
}

/// Final engine output
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub diagnostics: EngineDiagnostics,
}

/// The retrieval-and-analysis engine
pub struct QueryEngine {
    config: EngineConfig,
    graph: SharedEntityGraph,
    history: SharedConversationStore,
    classifier: Arc<dyn QueryClassifier>,
    retrieval: RetrievalEngine,
    assessor: SufficiencyAssessor,
    expander: DocumentExpander,
    analyzer: IterativeAnalyzer,
    citations: CitationBuilder,
    composer: ResponseComposer,
}

impl QueryEngine {
    /// Wire the engine from its collaborators
    pub fn new(
        config: EngineConfig,
        vector: SharedVectorIndex,
        graph: SharedEntityGraph,
        completion: SharedCompletionClient,
        segments: SharedSegmentLookup,
        history: SharedConversationStore,
    ) -> Self {
        let retrieval =
            RetrievalEngine::new(vector.clone(), graph.clone(), config.retrieval.clone());
        let assessor = SufficiencyAssessor::new(completion.clone(), config.sufficiency.clone());
        let expander = DocumentExpander::new(vector, graph.clone(), config.expansion.clone());
        let analyzer = IterativeAnalyzer::new(completion.clone(), config.iterative.clone());
        let citations = CitationBuilder::new(segments, config.compose.snippet_window_chars);
        let composer = ResponseComposer::new(completion, graph.clone(), config.compose.clone());

        Self {
            config,
            graph,
            history,
            classifier: Arc::new(KeywordClassifier::new()),
            retrieval,
            assessor,
            expander,
            analyzer,
            citations,
            composer,
        }
    }

    /// Swap the strategy classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Answer a query; total, never errors
    pub async fn answer(&self, request: QueryRequest) -> EngineResponse {
        self.answer_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Answer a query under an external cancellation token
    #[instrument(skip(self, request, token), fields(session = %request.session_id))]
    pub async fn answer_with_cancellation(
        &self,
        request: QueryRequest,
        token: CancellationToken,
    ) -> EngineResponse {
        let started = Instant::now();

        if request.query.trim().is_empty() {
            return EngineResponse {
                answer: "Please provide a question to search your documents with.".to_string(),
                citations: Vec::new(),
                diagnostics: EngineDiagnostics {
                    strategy: "none".to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                },
            };
        }

        let pre = self.preprocess_query(&request.query).await;
        let strategy = self.classifier.classify(&request.query);
        info!(
            strategy = strategy.label(),
            entities = pre.entities.len(),
            "Query classified"
        );

        let metrics = QueryMetrics::start(strategy.label());
        let mut diagnostics = EngineDiagnostics {
            strategy: strategy.label().to_string(),
            ..Default::default()
        };

        let (answer, citations) = match strategy {
            QueryStrategy::CollectionAnalysis(mode) => {
                self.collection_analysis(&request, &pre, mode, &token, &mut diagnostics)
                    .await
            }
            _ => {
                self.focused_answer(&request, &pre, strategy, &token, &mut diagnostics)
                    .await
            }
        };

        self.append_history(&request, &answer, &citations).await;

        diagnostics.duration_ms = started.elapsed().as_millis() as u64;
        metrics.finish(diagnostics.degraded);
        info!(
            strategy = %diagnostics.strategy,
            chunks = diagnostics.chunk_count,
            degraded = diagnostics.degraded,
            duration_ms = diagnostics.duration_ms,
            "Query answered"
        );

        EngineResponse {
            answer,
            citations,
            diagnostics,
        }
    }

    /// NER plus temporal expansion; graph failure means no entities
    async fn preprocess_query(&self, query: &str) -> PreprocessedQuery {
        let raw_entities = match self.graph.extract_entities_from_text(query).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(error = %e, "Entity extraction failed, continuing without entities");
                Vec::new()
            }
        };

        preprocess(query, &raw_entities, Utc::now())
    }

    /// Whole-collection survey: wide sweep into iterative analysis, with
    /// the analysis question shaped by the detected mode
    async fn collection_analysis(
        &self,
        request: &QueryRequest,
        pre: &PreprocessedQuery,
        mode: CollectionAnalysisMode,
        token: &CancellationToken,
        diagnostics: &mut EngineDiagnostics,
    ) -> (String, Vec<Citation>) {
        diagnostics.collection_mode = Some(mode.label().to_string());

        let retrieval_started = Instant::now();
        let sweep = self.retrieval.collection_sweep(pre, &request.scope).await;
        record_retrieval(
            retrieval_started.elapsed().as_secs_f64(),
            &diagnostics.strategy,
            sweep.fell_back,
        );

        diagnostics.retrieval_fell_back = sweep.fell_back;
        diagnostics.chunk_count = sweep.chunks.len();
        diagnostics.used_iterative = true;

        if sweep.chunks.is_empty() {
            diagnostics.degraded = sweep.fell_back;
            return (
                "Your collection has no readable content to analyze yet.".to_string(),
                Vec::new(),
            );
        }

        let question = format!("{}\n\n{}", request.query, mode.directive());
        let outcome = self.analyzer.analyze(&question, sweep.chunks, token).await;

        diagnostics.degraded = outcome.degraded;
        diagnostics.documents_processed = outcome.documents_processed;
        diagnostics.documents_skipped = outcome.documents_skipped;

        (outcome.answer, outcome.citations)
    }

    /// Focused path: retrieve, assess, optionally expand, answer
    async fn focused_answer(
        &self,
        request: &QueryRequest,
        pre: &PreprocessedQuery,
        strategy: QueryStrategy,
        token: &CancellationToken,
        diagnostics: &mut EngineDiagnostics,
    ) -> (String, Vec<Citation>) {
        let retrieval_started = Instant::now();
        let outcome = self
            .retrieval
            .retrieve(strategy, pre, &request.scope, token)
            .await;
        record_retrieval(
            retrieval_started.elapsed().as_secs_f64(),
            &diagnostics.strategy,
            outcome.fell_back,
        );

        diagnostics.retrieval_fell_back = outcome.fell_back;
        let mut chunks = outcome.chunks;

        if token.is_cancelled() {
            diagnostics.cancelled = true;
            diagnostics.degraded = true;
            return (ANSWER_UNAVAILABLE.to_string(), Vec::new());
        }

        let verdict = self.assessor.assess(&request.query, &chunks).await;
        diagnostics.sufficiency = Some(
            match verdict.sufficiency {
                Sufficiency::Sufficient => "sufficient",
                Sufficiency::Insufficient => "insufficient",
            }
            .to_string(),
        );
        diagnostics.decision_path = Some(verdict.decision_path.to_string());

        if verdict.sufficiency == Sufficiency::Insufficient {
            let expansion = self
                .expander
                .expand(
                    &pre.expanded,
                    chunks,
                    &verdict.requested_documents,
                    &pre.entities,
                    &request.scope,
                )
                .await;

            diagnostics.escalated = expansion.escalated;

            if expansion.use_iterative {
                diagnostics.used_iterative = true;
                diagnostics.chunk_count = expansion.chunks.len();

                let outcome = self
                    .analyzer
                    .analyze(&request.query, expansion.chunks, token)
                    .await;

                diagnostics.degraded = outcome.degraded;
                diagnostics.documents_processed = outcome.documents_processed;
                diagnostics.documents_skipped = outcome.documents_skipped;
                return (outcome.answer, outcome.citations);
            }

            chunks = expansion.chunks;
        }

        diagnostics.chunk_count = chunks.len();

        if chunks.is_empty() {
            return (
                "I could not find anything in your documents matching that question."
                    .to_string(),
                Vec::new(),
            );
        }

        let history = match self.history.history(request.session_id).await {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "History load failed, composing without it");
                Vec::new()
            }
        };

        let composed = self
            .composer
            .compose(&request.query, &chunks, &pre.entities, &history)
            .await;

        diagnostics.degraded = composed.degraded;

        let citations = if composed.degraded {
            Vec::new()
        } else {
            self.citations.build(&request.query, &chunks).await
        };

        (composed.answer, citations)
    }

    /// Append the turn to the rolling history; failures are logged only
    async fn append_history(&self, request: &QueryRequest, answer: &str, citations: &[Citation]) {
        let entries = vec![
            ConversationEntry::user(request.query.clone()),
            ConversationEntry::assistant(answer.to_string(), citations.to_vec()),
        ];

        if let Err(e) = self
            .history
            .append(
                request.session_id,
                entries,
                self.config.history_cap(),
                self.config.compose.history_ttl_secs,
            )
            .await
        {
            warn!(error = %e, "History append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusqa_common::clients::{
        InMemoryEntityGraph, InMemorySegmentLookup, InMemoryVectorIndex, MockCompletionClient,
    };
    use corpusqa_common::history::{ConversationStore, InMemoryConversationStore};
    use corpusqa_common::types::{Chunk, DocumentMeta, RetrievalSource};

    fn chunk(doc: Uuid, idx: i32, content: &str) -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            document_id: doc,
            content: content.to_string(),
            chunk_index: idx,
            score: 0.0,
            source: RetrievalSource::VectorFull,
            meta: DocumentMeta {
                title: Some("Solar Notes".to_string()),
                ..Default::default()
            },
        }
    }

    struct Fixture {
        engine: QueryEngine,
        vector: Arc<InMemoryVectorIndex>,
        history: Arc<InMemoryConversationStore>,
        completion: Arc<MockCompletionClient>,
    }

    async fn fixture(mock: MockCompletionClient) -> Fixture {
        let mock = Arc::new(mock);
        let vector = Arc::new(InMemoryVectorIndex::new());
        let graph = Arc::new(InMemoryEntityGraph::new());
        let segments = Arc::new(InMemorySegmentLookup::new());
        let history = Arc::new(InMemoryConversationStore::new());

        let doc = Uuid::new_v4();
        vector
            .insert_document(
                doc,
                vec![
                    chunk(doc, 0, "solar panel efficiency reached 23 percent"),
                    chunk(doc, 1, "solar panel maintenance schedule details"),
                    chunk(doc, 2, "solar panel installation steps overview"),
                ],
            )
            .await;

        let engine = QueryEngine::new(
            EngineConfig::default(),
            vector.clone(),
            graph,
            mock.clone(),
            segments,
            history.clone(),
        );

        Fixture {
            engine,
            vector,
            history,
            completion: mock,
        }
    }

    #[tokio::test]
    async fn test_sufficient_path_answers_with_citations() {
        let mock = MockCompletionClient::new("unused");
        // Judge and composer prompts are distinguished by their leads
        mock.respond_when(
            "Retrieved excerpts",
            r#"{"sufficiency": "SUFFICIENT", "reasoning": "ok"}"#,
        )
        .await;
        mock.respond_when("Sources:", "Efficiency reached 23 percent [1].")
            .await;

        let f = fixture(mock).await;
        let response = f
            .engine
            .answer(QueryRequest::new(Uuid::new_v4(), "solar panel efficiency"))
            .await;

        assert!(!response.diagnostics.degraded);
        assert_eq!(response.answer, "Efficiency reached 23 percent [1].");
        assert!(!response.citations.is_empty());
        assert_eq!(response.diagnostics.strategy, "semantic");
        assert_eq!(response.diagnostics.sufficiency.as_deref(), Some("sufficient"));
    }

    #[tokio::test]
    async fn test_history_records_the_turn() {
        let mock = MockCompletionClient::new("unused");
        mock.respond_when("Retrieved excerpts", r#"{"sufficiency": "SUFFICIENT"}"#)
            .await;
        mock.respond_when("Sources:", "the answer").await;

        let f = fixture(mock).await;
        let session = Uuid::new_v4();
        f.engine
            .answer(QueryRequest::new(session, "solar panel efficiency"))
            .await;

        let history = f.history.history(session).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "solar panel efficiency");
        assert_eq!(history[1].content, "the answer");
    }

    #[tokio::test]
    async fn test_empty_query_is_graceful() {
        let f = fixture(MockCompletionClient::new("unused")).await;
        let response = f.engine.answer(QueryRequest::new(Uuid::new_v4(), "   ")).await;

        assert!(response.answer.contains("Please provide a question"));
        assert!(response.citations.is_empty());
    }

    #[tokio::test]
    async fn test_total_index_outage_still_answers() {
        let f = fixture(MockCompletionClient::new("unused")).await;
        f.vector.fail_all_searches(true);

        let response = f
            .engine
            .answer(QueryRequest::new(Uuid::new_v4(), "solar panel efficiency"))
            .await;

        // Nothing retrieved anywhere; the engine still returns a response
        assert!(!response.answer.is_empty());
        assert!(response.citations.is_empty());
    }

    #[tokio::test]
    async fn test_collection_analysis_routes_to_iterative() {
        let mock = MockCompletionClient::new("collection summary text");
        let f = fixture(mock).await;

        let response = f
            .engine
            .answer(QueryRequest::new(
                Uuid::new_v4(),
                "summarize all documents in my collection",
            ))
            .await;

        assert_eq!(response.diagnostics.strategy, "collection_analysis");
        assert_eq!(
            response.diagnostics.collection_mode.as_deref(),
            Some("all_documents")
        );
        assert!(response.diagnostics.used_iterative);
        assert!(!response.answer.is_empty());
    }

    #[tokio::test]
    async fn test_collection_modes_shape_the_analysis() {
        let mock = MockCompletionClient::new("survey text");
        let f = fixture(mock).await;

        let timeline = f
            .engine
            .answer(QueryRequest::new(
                Uuid::new_v4(),
                "show the entire collection as a timeline",
            ))
            .await;
        assert_eq!(
            timeline.diagnostics.collection_mode.as_deref(),
            Some("temporal")
        );

        // The mode's directive reaches the analysis prompts
        let calls = f.completion.recorded_calls().await;
        assert!(calls.iter().any(|c| c.contains("chronologically")));
        assert!(!calls.iter().any(|c| c.contains("proportionate weight")));

        let survey = f
            .engine
            .answer(QueryRequest::new(
                Uuid::new_v4(),
                "summarize all documents in my collection",
            ))
            .await;
        assert_eq!(
            survey.diagnostics.collection_mode.as_deref(),
            Some("all_documents")
        );

        let calls = f.completion.recorded_calls().await;
        assert!(calls.iter().any(|c| c.contains("proportionate weight")));
    }

    #[tokio::test]
    async fn test_insufficient_verdict_expands_requested_document() {
        let vector = Arc::new(InMemoryVectorIndex::new());
        let graph = Arc::new(InMemoryEntityGraph::new());
        let segments = Arc::new(InMemorySegmentLookup::new());
        let history = Arc::new(InMemoryConversationStore::new());

        let doc = Uuid::new_v4();
        let chunks: Vec<Chunk> = (0..8)
            .map(|i| chunk(doc, i, &format!("merger agreement clause {}", i)))
            .collect();
        vector.insert_document(doc, chunks).await;

        let mock = MockCompletionClient::new("unused");
        mock.respond_when(
            "Retrieved excerpts",
            format!(
                r#"{{"sufficiency": "INSUFFICIENT", "requested_documents": ["{}"], "reasoning": "need full text"}}"#,
                doc
            ),
        )
        .await;
        mock.respond_when("Sources:", "Full merger summary [1].").await;

        let engine = QueryEngine::new(
            EngineConfig::default(),
            vector,
            graph,
            Arc::new(mock),
            segments,
            history,
        );

        let response = engine
            .answer(QueryRequest::new(Uuid::new_v4(), "merger agreement clause"))
            .await;

        assert_eq!(response.diagnostics.sufficiency.as_deref(), Some("insufficient"));
        assert!(response.diagnostics.escalated);
        assert!(!response.diagnostics.used_iterative);
        assert_eq!(response.answer, "Full merger summary [1].");
        // All eight chunks of the requested document reached the composer
        assert_eq!(response.diagnostics.chunk_count, 8);
    }
}
