//! Citation building
//!
//! Turns the final chunk set into user-facing evidence pointers: resolved
//! title, highlight sentence with the best keyword overlap against the
//! query, an extended sentence-bounded snippet around it, and optional
//! page/segment coordinates from the segment lookup. Segment resolution is
//! best-effort; a lookup failure leaves the field empty.

use corpusqa_common::clients::{resolve_or_none, SharedSegmentLookup};
use corpusqa_common::types::{Chunk, Citation};
use futures::future::join_all;
use std::collections::HashSet;

/// Stopwords ignored when scoring keyword overlap
const OVERLAP_STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "from", "what", "when",
    "where", "who", "why", "how", "are", "was", "were", "did", "does",
    "about", "into", "over", "have", "has",
];

/// Builds citations for a final chunk set
pub struct CitationBuilder {
    segments: SharedSegmentLookup,
    /// Extended snippet window in characters
    window: usize,
}

impl CitationBuilder {
    pub fn new(segments: SharedSegmentLookup, window: usize) -> Self {
        Self { segments, window }
    }

    /// One citation per chunk, in chunk order
    pub async fn build(&self, query: &str, chunks: &[Chunk]) -> Vec<Citation> {
        let futures = chunks.iter().map(|chunk| async move {
            let segment = resolve_or_none(self.segments.as_ref(), chunk.chunk_id).await;

            let highlight = best_sentence(query, &chunk.content);
            let snippet = match &highlight {
                Some(sentence) => extended_snippet(&chunk.content, sentence, self.window),
                None => truncate_chars(&chunk.content, self.window),
            };

            Citation {
                document_id: chunk.document_id,
                title: chunk.meta.display_title(chunk.document_id),
                chunk_id: chunk.chunk_id,
                relevance_score: chunk.score,
                snippet,
                highlight,
                segment,
            }
        });

        join_all(futures).await
    }
}

fn keywords(query: &str) -> HashSet<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !OVERLAP_STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Sentence with the highest keyword overlap against the query
fn best_sentence(query: &str, content: &str) -> Option<String> {
    let terms = keywords(query);
    if terms.is_empty() {
        return None;
    }

    let mut best: Option<(usize, &str)> = None;
    for sentence in split_sentences(content) {
        let lower = sentence.to_lowercase();
        let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
        if hits > 0 && best.map(|(score, _)| hits > score).unwrap_or(true) {
            best = Some((hits, sentence));
        }
    }

    best.map(|(_, sentence)| sentence.trim().to_string())
}

/// Sentence-bounded window around the highlight, ellipsized at cut edges
fn extended_snippet(content: &str, highlight: &str, window: usize) -> String {
    let anchor = match content.find(highlight) {
        Some(pos) => pos,
        None => return truncate_chars(content, window),
    };

    let half = window / 2;
    let mut start = anchor.saturating_sub(half);
    let mut end = (anchor + highlight.len() + half).min(content.len());

    while start > 0 && !content.is_char_boundary(start) {
        start -= 1;
    }
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }

    // Snap outward to sentence boundaries where one is close by
    if let Some(offset) = content[start..anchor].rfind(['.', '!', '?']) {
        let candidate = start + offset + 1;
        if content.is_char_boundary(candidate) {
            start = candidate;
        }
    }
    if let Some(offset) = content[end..].find(['.', '!', '?']) {
        let candidate = end + offset + 1;
        if candidate <= content.len() && content.is_char_boundary(candidate) {
            end = candidate;
        }
    }

    let mut snippet = content[start..end].trim().to_string();
    if start > 0 {
        snippet = format!("...{}", snippet);
    }
    if end < content.len() {
        snippet = format!("{}...", snippet);
    }
    snippet
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpusqa_common::clients::InMemorySegmentLookup;
    use corpusqa_common::types::{DocumentMeta, RetrievalSource, SegmentRef};
    use std::sync::Arc;
    use uuid::Uuid;

    fn chunk(content: &str) -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            content: content.to_string(),
            chunk_index: 0,
            score: 0.8,
            source: RetrievalSource::VectorFull,
            meta: DocumentMeta {
                title: Some("Solar Report".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_best_sentence_picks_highest_overlap() {
        let content = "The weather was mild. Solar panel efficiency reached \
                       23 percent this quarter. Nothing else happened.";
        let highlight = best_sentence("solar panel efficiency", content).unwrap();
        assert!(highlight.contains("Solar panel efficiency"));
    }

    #[test]
    fn test_no_overlap_means_no_highlight() {
        assert!(best_sentence("quantum tunneling", "A note about gardening.").is_none());
    }

    #[test]
    fn test_extended_snippet_has_ellipses_at_cuts() {
        let filler = "word ".repeat(200);
        let content = format!("{}Solar output peaked in June. {}", filler, filler);
        let snippet = extended_snippet(&content, "Solar output peaked in June.", 100);

        assert!(snippet.contains("Solar output peaked in June."));
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
    }

    #[tokio::test]
    async fn test_build_resolves_segments_best_effort() {
        let lookup = Arc::new(InMemorySegmentLookup::new());
        let with_segment = chunk("Solar panel output data for the quarter.");
        let without_segment = chunk("Unrelated maintenance note content.");

        lookup
            .insert(
                with_segment.chunk_id,
                SegmentRef {
                    page_number: Some(3),
                    bounds: Some([0.1, 0.2, 0.8, 0.4]),
                    segment_type: Some("paragraph".to_string()),
                },
            )
            .await;

        let builder = CitationBuilder::new(lookup, 1000);
        let citations = builder
            .build("solar panel output", &[with_segment.clone(), without_segment])
            .await;

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].title, "Solar Report");
        assert!(citations[0].segment.is_some());
        assert!(citations[1].segment.is_none());
        assert!(citations[0].highlight.is_some());
    }
}
