//! Response composition
//!
//! Builds the final answer prompt from the working chunk set: numbered
//! source blocks, entity relationship context from the graph, and the most
//! recent conversation turns. The completion call runs under the answer
//! deadline; any failure degrades to a fixed apology with no citations
//! rather than an error.

use corpusqa_common::clients::{ChatMessage, CompletionRequest, SharedCompletionClient, SharedEntityGraph};
use corpusqa_common::config::ComposeConfig;
use corpusqa_common::history::{ConversationEntry, EntryRole};
use corpusqa_common::types::Chunk;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Message shown when answer generation itself failed
pub const ANSWER_UNAVAILABLE: &str =
    "I found relevant material but could not generate an answer right now. \
     Please try again.";

/// Composed answer text
#[derive(Debug, Clone)]
pub struct ComposedAnswer {
    pub answer: String,

    /// True when the apology fallback was used; callers drop citations
    pub degraded: bool,
}

/// Final-answer composer
pub struct ResponseComposer {
    completion: SharedCompletionClient,
    graph: SharedEntityGraph,
    config: ComposeConfig,
}

impl ResponseComposer {
    pub fn new(
        completion: SharedCompletionClient,
        graph: SharedEntityGraph,
        config: ComposeConfig,
    ) -> Self {
        Self {
            completion,
            graph,
            config,
        }
    }

    /// Compose the final answer; total, never errors
    pub async fn compose(
        &self,
        query: &str,
        chunks: &[Chunk],
        entities: &[String],
        history: &[ConversationEntry],
    ) -> ComposedAnswer {
        let entity_context = self.entity_context(entities).await;
        let sources = source_blocks(chunks);

        let mut messages = vec![ChatMessage::system(
            "You answer questions from the numbered sources provided. \
             Ground every claim in a source and reference sources as [1], [2], \
             and so on. Say when the sources do not contain the answer.",
        )];

        for entry in recent_turns(history, self.config.history_turns) {
            match entry.role {
                EntryRole::User => messages.push(ChatMessage::user(entry.content.clone())),
                EntryRole::Assistant => {
                    messages.push(ChatMessage::assistant(entry.content.clone()))
                }
            }
        }

        let mut user = String::new();
        if !entity_context.is_empty() {
            user.push_str(&format!("Known entity relationships:\n{}\n\n", entity_context));
        }
        user.push_str(&format!("Sources:\n{}\nQuestion: {}", sources, query));
        messages.push(ChatMessage::user(user));

        let request = CompletionRequest::new(
            messages,
            1500,
            Duration::from_secs(self.config.answer_timeout_secs),
        );

        match self.completion.complete(request).await {
            Ok(answer) => {
                debug!(chars = answer.len(), "Answer composed");
                ComposedAnswer {
                    answer,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Answer composition failed");
                ComposedAnswer {
                    answer: ANSWER_UNAVAILABLE.to_string(),
                    degraded: true,
                }
            }
        }
    }

    /// Relationship phrases plus co-occurring entity names for the prompt;
    /// graph failures degrade to none
    async fn entity_context(&self, entities: &[String]) -> String {
        if entities.is_empty() {
            return String::new();
        }

        let relations = match self.graph.get_entity_relationships(entities).await {
            Ok(relations) => relations,
            Err(e) => {
                warn!(error = %e, "Entity relationship lookup failed, omitting context");
                return String::new();
            }
        };

        let mut lines: Vec<String> = relations
            .iter()
            .take(10)
            .map(|r| format!("- {} {} {}", r.subject, r.relation, r.object))
            .collect();

        // Entities appearing alongside the query's own, first seen first
        let mut seen: HashSet<String> = entities.iter().map(|e| e.to_lowercase()).collect();
        let co_occurring: Vec<&str> = relations
            .iter()
            .flat_map(|r| [r.subject.as_str(), r.object.as_str()])
            .filter(|name| seen.insert(name.to_lowercase()))
            .take(10)
            .collect();

        if !co_occurring.is_empty() {
            lines.push(format!("Co-occurring entities: {}", co_occurring.join(", ")));
        }

        lines.join("\n")
    }
}

/// Numbered source blocks, one per chunk, titles included
fn source_blocks(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} (score {:.2})\n{}\n\n",
            i + 1,
            chunk.meta.display_title(chunk.document_id),
            chunk.score,
            chunk.content
        ));
    }
    out
}

/// Last `turns` question/answer pairs, oldest first
fn recent_turns(history: &[ConversationEntry], turns: usize) -> &[ConversationEntry] {
    let entries = turns * 2;
    let start = history.len().saturating_sub(entries);
    &history[start..]
}
