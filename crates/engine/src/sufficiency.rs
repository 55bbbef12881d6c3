//! Context sufficiency assessment
//!
//! Decides whether the retrieved chunk set can answer the query or whether
//! specific documents should be fetched in full. The decision function is
//! total: judge call failures, timeouts, and malformed output all resolve
//! to a verdict through documented fallbacks, never an error.
//!
//! Decision order:
//! 1. empty chunk set: INSUFFICIENT
//! 2. headline short-circuit: skip the judge for headline-style queries
//!    with enough headline-like evidence
//! 3. LLM judge with strict JSON output
//! 4. parse fallback: look for the verdict word in free text
//! 5. call-failure fallback: score/keyword heuristics

use corpusqa_common::clients::{ChatMessage, CompletionRequest, SharedCompletionClient};
use corpusqa_common::config::SufficiencyConfig;
use corpusqa_common::metrics::record_sufficiency;
use corpusqa_common::types::Chunk;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Verdict on the current chunk set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sufficiency {
    Sufficient,
    Insufficient,
}

/// Assessment outcome, including any document requests
#[derive(Debug, Clone)]
pub struct SufficiencyVerdict {
    pub sufficiency: Sufficiency,

    /// Documents the judge wants fetched in full; bounded and always a
    /// subset of the documents present in the assessed chunks
    pub requested_documents: Vec<Uuid>,

    /// Judge reasoning or fallback explanation, for diagnostics
    pub reasoning: String,

    /// Which decision path produced the verdict
    pub decision_path: &'static str,
}

impl SufficiencyVerdict {
    fn sufficient(reasoning: impl Into<String>, path: &'static str) -> Self {
        Self {
            sufficiency: Sufficiency::Sufficient,
            requested_documents: Vec::new(),
            reasoning: reasoning.into(),
            decision_path: path,
        }
    }

    fn insufficient(
        requested: Vec<Uuid>,
        reasoning: impl Into<String>,
        path: &'static str,
    ) -> Self {
        Self {
            sufficiency: Sufficiency::Insufficient,
            requested_documents: requested,
            reasoning: reasoning.into(),
            decision_path: path,
        }
    }
}

#[derive(Deserialize)]
struct JudgeOutput {
    sufficiency: String,
    #[serde(default)]
    requested_documents: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

const HEADLINE_QUERY_TERMS: &[&str] = &["headline", "headlines", "top stories", "news summary"];
const HEADLINE_CHUNK_TERMS: &[&str] = &["headline", "breaking", "news", "reported", "announced"];
const COMPREHENSIVE_TERMS: &[&str] = &[
    "comprehensive",
    "entire",
    "all content",
    "everything",
    "complete overview",
    "full picture",
    "in full",
];

/// LLM-backed sufficiency assessor
pub struct SufficiencyAssessor {
    completion: SharedCompletionClient,
    config: SufficiencyConfig,
}

impl SufficiencyAssessor {
    pub fn new(completion: SharedCompletionClient, config: SufficiencyConfig) -> Self {
        Self { completion, config }
    }

    /// Assess whether `chunks` can answer `query`; total, never errors
    pub async fn assess(&self, query: &str, chunks: &[Chunk]) -> SufficiencyVerdict {
        if chunks.is_empty() {
            record_sufficiency("insufficient", "empty");
            return SufficiencyVerdict::insufficient(
                Vec::new(),
                "No chunks retrieved",
                "empty",
            );
        }

        if let Some(verdict) = self.headline_short_circuit(query, chunks) {
            record_sufficiency("sufficient", "headline");
            return verdict;
        }

        let verdict = match self.call_judge(query, chunks).await {
            Ok(text) => self.parse_judge_output(&text, chunks),
            Err(e) => {
                warn!(error = %e, "Sufficiency judge call failed, using heuristics");
                self.heuristic_verdict(query, chunks)
            }
        };

        let label = match verdict.sufficiency {
            Sufficiency::Sufficient => "sufficient",
            Sufficiency::Insufficient => "insufficient",
        };
        record_sufficiency(label, verdict.decision_path);
        verdict
    }

    /// Headline-style queries with plenty of headline-like chunks skip the
    /// judge entirely.
    fn headline_short_circuit(&self, query: &str, chunks: &[Chunk]) -> Option<SufficiencyVerdict> {
        let lower = query.to_lowercase();
        if !HEADLINE_QUERY_TERMS.iter().any(|t| lower.contains(t)) {
            return None;
        }

        let headline_like = chunks
            .iter()
            .filter(|c| {
                let content = c.content.to_lowercase();
                HEADLINE_CHUNK_TERMS.iter().any(|t| content.contains(t))
            })
            .count();

        if headline_like >= self.config.headline_min_chunks
            || chunks.len() >= self.config.headline_min_total
        {
            debug!(headline_like, total = chunks.len(), "Headline short-circuit");
            return Some(SufficiencyVerdict::sufficient(
                format!(
                    "Headline query with {} headline-like chunks of {}",
                    headline_like,
                    chunks.len()
                ),
                "headline",
            ));
        }

        None
    }

    async fn call_judge(&self, query: &str, chunks: &[Chunk]) -> corpusqa_common::Result<String> {
        let summary = self.document_summary(chunks);

        let system = "You judge whether retrieved document excerpts are sufficient \
                      to answer a question. Respond with strict JSON only: \
                      {\"sufficiency\": \"SUFFICIENT\" or \"INSUFFICIENT\", \
                      \"requested_documents\": [document ids needing full retrieval], \
                      \"reasoning\": \"one sentence\"}. \
                      Request a document only when its excerpts look relevant but \
                      incomplete. Request at most five documents.";

        let user = format!(
            "Question: {}\n\nRetrieved excerpts by document:\n{}",
            query, summary
        );

        let request = CompletionRequest::new(
            vec![ChatMessage::system(system), ChatMessage::user(user)],
            500,
            Duration::from_secs(self.config.timeout_secs),
        );

        self.completion.complete(request).await
    }

    /// Per-document digest shown to the judge: top chunks by score,
    /// truncated previews, with ids the judge can request.
    fn document_summary(&self, chunks: &[Chunk]) -> String {
        let mut by_doc: HashMap<Uuid, Vec<&Chunk>> = HashMap::new();
        for chunk in chunks {
            by_doc.entry(chunk.document_id).or_default().push(chunk);
        }

        let mut doc_ids: Vec<Uuid> = by_doc.keys().copied().collect();
        doc_ids.sort();

        let mut out = String::new();
        for doc_id in doc_ids {
            let mut doc_chunks = by_doc.remove(&doc_id).unwrap_or_default();
            doc_chunks.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let title = doc_chunks
                .first()
                .map(|c| c.meta.display_title(doc_id))
                .unwrap_or_else(|| format!("Document {}", doc_id));

            out.push_str(&format!(
                "Document {} ({}), {} chunks retrieved:\n",
                doc_id,
                title,
                doc_chunks.len()
            ));
            for chunk in doc_chunks.iter().take(self.config.preview_chunks_per_doc) {
                let preview: String = chunk.content.chars().take(self.config.preview_chars).collect();
                out.push_str(&format!("  - [score {:.2}] {}\n", chunk.score, preview));
            }
        }
        out
    }

    /// Strict JSON parse with a free-text fallback
    fn parse_judge_output(&self, text: &str, chunks: &[Chunk]) -> SufficiencyVerdict {
        if let Some(output) = extract_json::<JudgeOutput>(text) {
            let requested = self.bound_requested(&output.requested_documents, chunks);
            return if output.sufficiency.eq_ignore_ascii_case("insufficient") {
                SufficiencyVerdict::insufficient(requested, output.reasoning, "judge")
            } else {
                SufficiencyVerdict::sufficient(output.reasoning, "judge")
            };
        }

        // Malformed output: the verdict word is still a signal
        if text.to_uppercase().contains("INSUFFICIENT") {
            SufficiencyVerdict::insufficient(
                Vec::new(),
                "Malformed judge output containing INSUFFICIENT",
                "text_fallback",
            )
        } else {
            SufficiencyVerdict::sufficient(
                "Malformed judge output without INSUFFICIENT",
                "text_fallback",
            )
        }
    }

    /// Clamp requested documents to the configured bound and to documents
    /// actually present in the assessed chunks.
    fn bound_requested(&self, raw: &[String], chunks: &[Chunk]) -> Vec<Uuid> {
        let present: std::collections::HashSet<Uuid> =
            chunks.iter().map(|c| c.document_id).collect();

        raw.iter()
            .filter_map(|s| Uuid::parse_str(s.trim()).ok())
            .filter(|id| present.contains(id))
            .take(self.config.max_requested_documents)
            .collect()
    }

    /// Heuristic verdict when the judge call itself failed
    fn heuristic_verdict(&self, query: &str, chunks: &[Chunk]) -> SufficiencyVerdict {
        let lower = query.to_lowercase();

        if COMPREHENSIVE_TERMS.iter().any(|t| lower.contains(t)) {
            // Comprehensive queries get the top documents by mean chunk score
            let mut totals: HashMap<Uuid, (f32, usize)> = HashMap::new();
            for chunk in chunks {
                let entry = totals.entry(chunk.document_id).or_insert((0.0, 0));
                entry.0 += chunk.score;
                entry.1 += 1;
            }

            let mut ranked: Vec<(Uuid, f32)> = totals
                .into_iter()
                .map(|(id, (sum, count))| (id, sum / count as f32))
                .collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });

            let requested: Vec<Uuid> = ranked
                .into_iter()
                .take(self.config.comprehensive_top_docs)
                .map(|(id, _)| id)
                .collect();

            return SufficiencyVerdict::insufficient(
                requested,
                "Comprehensive query; judge unavailable",
                "heuristic",
            );
        }

        let strong = chunks
            .iter()
            .filter(|c| c.score > self.config.strong_score)
            .count();

        if strong >= self.config.heuristic_min_strong {
            SufficiencyVerdict::sufficient(
                format!("{} strong chunks; judge unavailable", strong),
                "heuristic",
            )
        } else {
            SufficiencyVerdict::insufficient(
                Vec::new(),
                format!("Only {} strong chunks; judge unavailable", strong),
                "heuristic",
            )
        }
    }
}

/// Best-effort JSON extraction: whole text first, then the outermost
/// brace-delimited block.
fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Some(parsed);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}
