//! Query strategy selection
//!
//! Keyword-driven classification with fixed precedence:
//! collection analysis > metadata > entity > temporal > semantic.
//! Classification looks only at the query text; entity extraction results
//! do not influence it.

use regex_lite::Regex;
use std::sync::OnceLock;

/// How the whole-collection intent should be analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionAnalysisMode {
    /// Scoped by a filter term the query names
    Filtered,
    /// Grouped by category or kind
    Category,
    /// Ordered along a timeline
    Temporal,
    /// Plain survey of everything visible
    AllDocuments,
}

impl CollectionAnalysisMode {
    /// Stable label for logs and diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            CollectionAnalysisMode::Filtered => "filtered",
            CollectionAnalysisMode::Category => "category",
            CollectionAnalysisMode::Temporal => "temporal",
            CollectionAnalysisMode::AllDocuments => "all_documents",
        }
    }

    /// Instruction appended to the analysis question so the survey is
    /// shaped the way the query asked for
    pub fn directive(&self) -> &'static str {
        match self {
            CollectionAnalysisMode::Filtered => {
                "Restrict the survey to documents matching the filter the question names; ignore the rest."
            }
            CollectionAnalysisMode::Category => {
                "Organize the survey by document category or kind, naming each group."
            }
            CollectionAnalysisMode::Temporal => {
                "Organize the survey chronologically and note the time period each document covers."
            }
            CollectionAnalysisMode::AllDocuments => {
                "Survey the whole collection evenly, giving each document proportionate weight."
            }
        }
    }
}

/// Retrieval strategy chosen for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStrategy {
    /// Whole-collection survey routed through iterative analysis
    CollectionAnalysis(CollectionAnalysisMode),
    /// Queries carrying addresses or header-style markers
    Metadata,
    /// Queries centered on a named person or organization
    Entity,
    /// Queries anchored to dates or periods
    Temporal,
    /// Default hybrid semantic retrieval
    Semantic,
}

impl QueryStrategy {
    /// Stable label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            QueryStrategy::CollectionAnalysis(_) => "collection_analysis",
            QueryStrategy::Metadata => "metadata",
            QueryStrategy::Entity => "entity",
            QueryStrategy::Temporal => "temporal",
            QueryStrategy::Semantic => "semantic",
        }
    }
}

/// Strategy selection seam; the engine only depends on this trait
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, query: &str) -> QueryStrategy;
}

/// Default keyword classifier
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

const COLLECTION_PHRASES: &[&str] = &[
    "all documents",
    "all my documents",
    "all files",
    "all my files",
    "every document",
    "entire collection",
    "whole collection",
    "across the collection",
    "across my documents",
    "everything in my documents",
    "everything i have",
];

const FILTER_TERMS: &[&str] = &["tagged", "labeled", "labelled", "filtered", "matching", "marked"];

const CATEGORY_TERMS: &[&str] = &["category", "categories", "type of", "types of", "kind of", "kinds of", "grouped"];

const COLLECTION_TEMPORAL_TERMS: &[&str] = &["timeline", "over time", "by date", "chronological", "chronologically"];

const METADATA_MARKERS: &[&str] = &["from:", "to:", "cc:", "bcc:", "subject:", "sender", "recipient", "attachment"];

const ENTITY_MARKERS: &[&str] = &[
    "who is",
    "who was",
    "who are",
    "tell me about",
    "person named",
    "people named",
    "everything about",
    "related to",
];

const TEMPORAL_MARKERS: &[&str] = &[
    "today",
    "yesterday",
    "last week",
    "this week",
    "last month",
    "this month",
    "last year",
    "this year",
    "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december",
];

fn topic_veto_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "... all documents about the <topic>" is a scoped question, not a
    // collection survey.
    RE.get_or_init(|| Regex::new(r"about (the |my |a |an )?[a-z0-9]").unwrap())
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap())
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, query: &str) -> QueryStrategy {
        let lower = query.to_lowercase();

        let wants_collection = COLLECTION_PHRASES.iter().any(|p| lower.contains(p));
        if wants_collection && !topic_veto_regex().is_match(&lower) {
            let mode = if FILTER_TERMS.iter().any(|t| lower.contains(t)) {
                CollectionAnalysisMode::Filtered
            } else if CATEGORY_TERMS.iter().any(|t| lower.contains(t)) {
                CollectionAnalysisMode::Category
            } else if COLLECTION_TEMPORAL_TERMS.iter().any(|t| lower.contains(t)) {
                CollectionAnalysisMode::Temporal
            } else {
                CollectionAnalysisMode::AllDocuments
            };
            return QueryStrategy::CollectionAnalysis(mode);
        }

        if email_regex().is_match(query) || METADATA_MARKERS.iter().any(|m| lower.contains(m)) {
            return QueryStrategy::Metadata;
        }

        if ENTITY_MARKERS.iter().any(|m| lower.contains(m)) {
            return QueryStrategy::Entity;
        }

        if TEMPORAL_MARKERS.iter().any(|m| lower.contains(m)) || year_regex().is_match(&lower) {
            return QueryStrategy::Temporal;
        }

        QueryStrategy::Semantic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(query: &str) -> QueryStrategy {
        KeywordClassifier::new().classify(query)
    }

    #[test]
    fn test_collection_analysis_detection() {
        assert_eq!(
            classify("summarize all documents in my library"),
            QueryStrategy::CollectionAnalysis(CollectionAnalysisMode::AllDocuments)
        );
        assert_eq!(
            classify("show the entire collection as a timeline"),
            QueryStrategy::CollectionAnalysis(CollectionAnalysisMode::Temporal)
        );
        assert_eq!(
            classify("all documents tagged urgent"),
            QueryStrategy::CollectionAnalysis(CollectionAnalysisMode::Filtered)
        );
        assert_eq!(
            classify("what categories exist across my documents"),
            QueryStrategy::CollectionAnalysis(CollectionAnalysisMode::Category)
        );
    }

    #[test]
    fn test_topic_scoped_query_is_not_collection_analysis() {
        // Names a topic, so it is a scoped question despite the phrasing
        let strategy = classify("all documents about the merger");
        assert_ne!(
            strategy,
            QueryStrategy::CollectionAnalysis(CollectionAnalysisMode::AllDocuments)
        );
    }

    #[test]
    fn test_metadata_precedes_entity() {
        assert_eq!(classify("emails from alice@example.com"), QueryStrategy::Metadata);
        assert_eq!(classify("messages with subject: budget"), QueryStrategy::Metadata);
    }

    #[test]
    fn test_entity_precedes_temporal() {
        assert_eq!(classify("who is Marie Curie"), QueryStrategy::Entity);
        // Entity marker wins even with a temporal word present
        assert_eq!(classify("tell me about Alice last year"), QueryStrategy::Entity);
    }

    #[test]
    fn test_temporal_detection() {
        assert_eq!(classify("what happened yesterday"), QueryStrategy::Temporal);
        assert_eq!(classify("reports from 2023"), QueryStrategy::Temporal);
    }

    #[test]
    fn test_semantic_default() {
        assert_eq!(classify("solar panel efficiency"), QueryStrategy::Semantic);
    }

    #[test]
    fn test_collection_modes_carry_distinct_directives() {
        let directives = [
            CollectionAnalysisMode::Filtered,
            CollectionAnalysisMode::Category,
            CollectionAnalysisMode::Temporal,
            CollectionAnalysisMode::AllDocuments,
        ]
        .map(|m| m.directive());

        for (i, a) in directives.iter().enumerate() {
            for b in directives.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
