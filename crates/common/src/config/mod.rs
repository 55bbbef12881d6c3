//! Configuration management for the CorpusQA engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with CORPUSQA__)
//! - Configuration files (config/default.toml, config/<env>.toml)
//! - Default values
//!
//! Every retrieval budget, score threshold and deadline lives here. The
//! engine hydrates one immutable snapshot per request; no limit in this
//! file is ever exceeded inside a single retrieval call.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Retrieval budgets and thresholds
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Sufficiency assessment
    #[serde(default)]
    pub sufficiency: SufficiencyConfig,

    /// Document expansion ceilings
    #[serde(default)]
    pub expansion: ExpansionConfig,

    /// Iterative analysis
    #[serde(default)]
    pub iterative: IterativeConfig,

    /// Response composition and conversation memory
    #[serde(default)]
    pub compose: ComposeConfig,

    /// Completion endpoint
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Vector index service
    #[serde(default)]
    pub vector: VectorServiceConfig,

    /// Entity graph service
    #[serde(default)]
    pub graph: GraphServiceConfig,

    /// Conversation history store (Redis)
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Per-call retrieval ceilings; configuration constants, never exceeded
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Maximum results from the full-corpus similarity branch
    #[serde(default = "default_max_retrieval_results")]
    pub max_retrieval_results: usize,

    /// Maximum results from the entity-filtered branch
    #[serde(default = "default_max_entity_results")]
    pub max_entity_results: usize,

    /// Chunks surviving dedup/re-rank into the composer
    #[serde(default = "default_final_result_limit")]
    pub final_result_limit: usize,

    /// Score threshold for the full-corpus branch
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// Fallback bare-search limit
    #[serde(default = "default_fallback_limit")]
    pub fallback_limit: usize,

    /// Fallback bare-search threshold
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f32,

    /// Entity graph traversal depth for related-document lookup
    #[serde(default = "default_entity_hop_count")]
    pub entity_hop_count: u32,

    /// Multiplier applied to chunks arriving from the entity-filtered branch
    #[serde(default = "default_entity_source_boost")]
    pub entity_source_boost: f32,

    /// Per-entity weight in the importance re-rank
    #[serde(default = "default_entity_boost_weight")]
    pub entity_boost_weight: f32,

    /// Enable near-duplicate removal
    #[serde(default = "default_dedup_enabled")]
    pub dedup_enabled: bool,
}

/// Sufficiency assessor settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SufficiencyConfig {
    /// Judge call deadline in seconds
    #[serde(default = "default_assess_timeout")]
    pub timeout_secs: u64,

    /// Maximum documents the judge may request
    #[serde(default = "default_max_requested_documents")]
    pub max_requested_documents: usize,

    /// Headline short-circuit: minimum headline-like chunks
    #[serde(default = "default_headline_min_chunks")]
    pub headline_min_chunks: usize,

    /// Headline short-circuit: minimum total chunks
    #[serde(default = "default_headline_min_total")]
    pub headline_min_total: usize,

    /// Heuristic fallback: chunks above `strong_score` needed for SUFFICIENT
    #[serde(default = "default_heuristic_min_strong")]
    pub heuristic_min_strong: usize,

    /// Heuristic fallback: score counted as a strong chunk
    #[serde(default = "default_strong_score")]
    pub strong_score: f32,

    /// Documents nominated when a comprehensive query forces INSUFFICIENT
    #[serde(default = "default_comprehensive_top_docs")]
    pub comprehensive_top_docs: usize,

    /// Per-document chunk previews shown to the judge
    #[serde(default = "default_preview_chunks_per_doc")]
    pub preview_chunks_per_doc: usize,

    /// Preview truncation length in characters
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

/// Document expansion ceilings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpansionConfig {
    /// Combined sets at or below this go straight to direct processing
    #[serde(default = "default_direct_limit")]
    pub direct_limit: usize,

    /// Combined sets above this are trimmed before iterative analysis
    #[serde(default = "default_iterative_ceiling")]
    pub iterative_ceiling: usize,

    /// Hard valve: abandon escalation entirely past this many chunks
    #[serde(default = "default_escalation_ceiling")]
    pub escalation_ceiling: usize,

    /// Maximum documents gathered by automatic discovery
    #[serde(default = "default_max_auto_documents")]
    pub max_auto_documents: usize,

    /// Broad-search chunks inspected for candidate document ids
    #[serde(default = "default_discovery_search_limit")]
    pub discovery_search_limit: usize,
}

/// Iterative (hierarchical batch) analysis settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterativeConfig {
    /// Chunks per analysis batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Documents above this many chunks are skipped entirely
    #[serde(default = "default_max_chunks_per_document")]
    pub max_chunks_per_document: usize,

    /// Per-document processing deadline in seconds
    #[serde(default = "default_per_document_timeout")]
    pub per_document_timeout_secs: u64,

    /// Single batch analysis deadline in seconds
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,

    /// Per-document combine deadline in seconds
    #[serde(default = "default_combine_timeout")]
    pub combine_timeout_secs: u64,

    /// Final cross-document synthesis deadline in seconds
    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_secs: u64,

    /// Word budget for a single batch analysis
    #[serde(default = "default_batch_word_limit")]
    pub batch_word_limit: usize,

    /// Word budget for a per-document summary
    #[serde(default = "default_combine_word_limit")]
    pub combine_word_limit: usize,

    /// Chunks kept on the degraded direct-answer path
    #[serde(default = "default_degraded_chunk_limit")]
    pub degraded_chunk_limit: usize,

    /// Total chunk valve; above this the degraded path is used
    #[serde(default = "default_max_total_chunks")]
    pub max_total_chunks: usize,
}

/// Response composition and conversation memory
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComposeConfig {
    /// Main answer deadline in seconds
    #[serde(default = "default_answer_timeout")]
    pub answer_timeout_secs: u64,

    /// Conversational turns included in the prompt
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Rolling history is capped at twice this many entries
    #[serde(default = "default_conversation_memory_size")]
    pub conversation_memory_size: usize,

    /// History expiry in seconds
    #[serde(default = "default_history_ttl")]
    pub history_ttl_secs: u64,

    /// Extended snippet window in characters
    #[serde(default = "default_snippet_window")]
    pub snippet_window_chars: usize,
}

/// Completion endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// API endpoint (chat-completions shaped)
    #[serde(default = "default_completion_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Maximum retries for transient failures
    #[serde(default = "default_completion_retries")]
    pub max_retries: u32,
}

/// Vector index service endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorServiceConfig {
    /// Base URL of the vector index service
    #[serde(default = "default_vector_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
}

/// Entity graph service endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphServiceConfig {
    /// Base URL of the entity graph service
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
}

/// Conversation history store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

// Default value functions
fn default_max_retrieval_results() -> usize { 100 }
fn default_max_entity_results() -> usize { 60 }
fn default_final_result_limit() -> usize { 50 }
fn default_score_threshold() -> f32 { 0.20 }
fn default_fallback_limit() -> usize { 500 }
fn default_fallback_threshold() -> f32 { 0.3 }
fn default_entity_hop_count() -> u32 { 1 }
fn default_entity_source_boost() -> f32 { 1.2 }
fn default_entity_boost_weight() -> f32 { 0.1 }
fn default_dedup_enabled() -> bool { true }
fn default_assess_timeout() -> u64 { 30 }
fn default_max_requested_documents() -> usize { 5 }
fn default_headline_min_chunks() -> usize { 5 }
fn default_headline_min_total() -> usize { 20 }
fn default_heuristic_min_strong() -> usize { 3 }
fn default_strong_score() -> f32 { 0.7 }
fn default_comprehensive_top_docs() -> usize { 3 }
fn default_preview_chunks_per_doc() -> usize { 3 }
fn default_preview_chars() -> usize { 200 }
fn default_direct_limit() -> usize { 50 }
fn default_iterative_ceiling() -> usize { 200 }
fn default_escalation_ceiling() -> usize { 400 }
fn default_max_auto_documents() -> usize { 5 }
fn default_discovery_search_limit() -> usize { 20 }
fn default_batch_size() -> usize { 15 }
fn default_max_chunks_per_document() -> usize { 200 }
fn default_per_document_timeout() -> u64 { 300 }
fn default_batch_timeout() -> u64 { 30 }
fn default_combine_timeout() -> u64 { 45 }
fn default_synthesis_timeout() -> u64 { 60 }
fn default_batch_word_limit() -> usize { 200 }
fn default_combine_word_limit() -> usize { 400 }
fn default_degraded_chunk_limit() -> usize { 30 }
fn default_max_total_chunks() -> usize { 400 }
fn default_answer_timeout() -> u64 { 900 }
fn default_history_turns() -> usize { 3 }
fn default_conversation_memory_size() -> usize { 10 }
fn default_history_ttl() -> u64 { 86_400 }
fn default_snippet_window() -> usize { 1000 }
fn default_completion_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_completion_model() -> String { "gpt-4o-mini".to_string() }
fn default_completion_retries() -> u32 { 2 }
fn default_vector_base_url() -> String { "http://localhost:8091".to_string() }
fn default_graph_base_url() -> String { "http://localhost:8092".to_string() }
fn default_service_timeout() -> u64 { 30 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "corpusqa".to_string() }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_retrieval_results: default_max_retrieval_results(),
            max_entity_results: default_max_entity_results(),
            final_result_limit: default_final_result_limit(),
            score_threshold: default_score_threshold(),
            fallback_limit: default_fallback_limit(),
            fallback_threshold: default_fallback_threshold(),
            entity_hop_count: default_entity_hop_count(),
            entity_source_boost: default_entity_source_boost(),
            entity_boost_weight: default_entity_boost_weight(),
            dedup_enabled: default_dedup_enabled(),
        }
    }
}

impl Default for SufficiencyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_assess_timeout(),
            max_requested_documents: default_max_requested_documents(),
            headline_min_chunks: default_headline_min_chunks(),
            headline_min_total: default_headline_min_total(),
            heuristic_min_strong: default_heuristic_min_strong(),
            strong_score: default_strong_score(),
            comprehensive_top_docs: default_comprehensive_top_docs(),
            preview_chunks_per_doc: default_preview_chunks_per_doc(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            direct_limit: default_direct_limit(),
            iterative_ceiling: default_iterative_ceiling(),
            escalation_ceiling: default_escalation_ceiling(),
            max_auto_documents: default_max_auto_documents(),
            discovery_search_limit: default_discovery_search_limit(),
        }
    }
}

impl Default for IterativeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_chunks_per_document: default_max_chunks_per_document(),
            per_document_timeout_secs: default_per_document_timeout(),
            batch_timeout_secs: default_batch_timeout(),
            combine_timeout_secs: default_combine_timeout(),
            synthesis_timeout_secs: default_synthesis_timeout(),
            batch_word_limit: default_batch_word_limit(),
            combine_word_limit: default_combine_word_limit(),
            degraded_chunk_limit: default_degraded_chunk_limit(),
            max_total_chunks: default_max_total_chunks(),
        }
    }
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            answer_timeout_secs: default_answer_timeout(),
            history_turns: default_history_turns(),
            conversation_memory_size: default_conversation_memory_size(),
            history_ttl_secs: default_history_ttl(),
            snippet_window_chars: default_snippet_window(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_completion_endpoint(),
            api_key: None,
            model: default_completion_model(),
            max_retries: default_completion_retries(),
        }
    }
}

impl Default for VectorServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_vector_base_url(),
            timeout_secs: default_service_timeout(),
        }
    }
}

impl Default for GraphServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            timeout_secs: default_service_timeout(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            sufficiency: SufficiencyConfig::default(),
            expansion: ExpansionConfig::default(),
            iterative: IterativeConfig::default(),
            compose: ComposeConfig::default(),
            completion: CompletionConfig::default(),
            vector: VectorServiceConfig::default(),
            graph: GraphServiceConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("CORPUSQA_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with CORPUSQA__ prefix
            // e.g., CORPUSQA__RETRIEVAL__FINAL_RESULT_LIMIT=20
            .add_source(
                Environment::with_prefix("CORPUSQA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("CORPUSQA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Sufficiency judge deadline
    pub fn assess_timeout(&self) -> Duration {
        Duration::from_secs(self.sufficiency.timeout_secs)
    }

    /// Main answer deadline
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.compose.answer_timeout_secs)
    }

    /// Rolling history entry cap (question and answer entries counted separately)
    pub fn history_cap(&self) -> usize {
        self.compose.conversation_memory_size * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let config = EngineConfig::default();
        assert_eq!(config.retrieval.final_result_limit, 50);
        assert_eq!(config.retrieval.score_threshold, 0.20);
        assert_eq!(config.expansion.iterative_ceiling, 200);
        assert_eq!(config.expansion.escalation_ceiling, 400);
        assert_eq!(config.iterative.batch_size, 15);
        assert_eq!(config.compose.answer_timeout_secs, 900);
    }

    #[test]
    fn test_history_cap() {
        let config = EngineConfig::default();
        assert_eq!(config.history_cap(), 20);
    }
}
