//! CorpusQA Common Library
//!
//! Shared code for the CorpusQA engine:
//! - Core data model (chunks, citations, entities, scopes)
//! - Collaborator client abstractions (vector index, entity graph,
//!   completion endpoint, segment lookup)
//! - Conversation history store
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod clients;
pub mod config;
pub mod errors;
pub mod history;
pub mod metrics;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use errors::{EngineError, Result};
pub use types::{Chunk, Citation, CollectionScope, DocumentMeta, RetrievalSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for binaries and integration tests
///
/// Respects `RUST_LOG`; defaults to `info` for the corpusqa crates.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,corpusqa_common=info,corpusqa_engine=info"));

    let _ = fmt().with_env_filter(filter).try_init();
}
