//! CorpusQA Engine
//!
//! Hybrid retrieval and context-bounded analysis over a user's document
//! collection:
//! - Query preprocessing (temporal expansion, entity filtering)
//! - Strategy selection and strategy-shaped retrieval recipes
//! - Fused vector + entity-graph retrieval with re-ranking and dedup
//! - LLM sufficiency assessment with bounded document requests
//! - Full-document expansion under hard chunk ceilings
//! - Hierarchical iterative analysis for oversized contexts
//! - Citation building and final response composition
//!
//! [`engine::QueryEngine::answer`] is the single entry point; it is a
//! total function over its inputs.

pub mod citation;
pub mod compose;
pub mod engine;
pub mod expand;
pub mod iterative;
pub mod preprocess;
pub mod retrieval;
pub mod strategy;
pub mod sufficiency;

pub use engine::{EngineDiagnostics, EngineResponse, QueryEngine, QueryRequest};
pub use strategy::{CollectionAnalysisMode, KeywordClassifier, QueryClassifier, QueryStrategy};
