//! Collaborator client abstractions
//!
//! The engine is purely a consumer of external capabilities: vector
//! similarity search, entity graph queries, chat completions, and page
//! segment lookup. Each lives behind a trait with an HTTP implementation
//! and an in-memory implementation for tests.

pub mod completion;
pub mod dedup;
pub mod graph;
pub mod segments;
pub mod vector;

pub use completion::{
    ChatMessage, CompletionClient, CompletionRequest, HttpCompletionClient, MockCompletionClient,
    MockFailure, SharedCompletionClient,
};
pub use dedup::{ContentKeyDeduplicator, Deduplicator, SharedDeduplicator};
pub use graph::{EntityGraph, HttpEntityGraph, InMemoryEntityGraph, SharedEntityGraph};
pub use segments::{
    resolve_or_none, HttpSegmentLookup, InMemorySegmentLookup, SegmentLookup, SharedSegmentLookup,
};
pub use vector::{HttpVectorIndex, InMemoryVectorIndex, SharedVectorIndex, VectorIndex};
