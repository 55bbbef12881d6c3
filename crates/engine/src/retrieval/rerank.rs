//! Re-ranking and budget enforcement
//!
//! The last stage of every retrieval recipe: entity-importance boost,
//! near-duplicate removal, deterministic sort, truncation to the final
//! result limit. Scores only ever move up here; ordering ties break on
//! chunk id so repeated runs produce identical output.

use corpusqa_common::clients::SharedDeduplicator;
use corpusqa_common::types::Chunk;
use std::collections::HashMap;

/// Boost chunks that mention important entities
///
/// Each entity present in a chunk's content (case-insensitive substring)
/// contributes `importance * weight` to a multiplicative boost:
/// `score *= 1 + sum(contributions)`. Entities missing from the importance
/// map count with importance 1.0.
pub fn apply_entity_boost(
    chunks: &mut [Chunk],
    entities: &[String],
    importance: &HashMap<String, f32>,
    weight: f32,
) {
    if entities.is_empty() {
        return;
    }

    let lowered: Vec<(String, f32)> = entities
        .iter()
        .map(|name| {
            let score = importance.get(name).copied().unwrap_or(1.0);
            (name.to_lowercase(), score)
        })
        .collect();

    for chunk in chunks.iter_mut() {
        let content = chunk.content.to_lowercase();
        let boost: f32 = lowered
            .iter()
            .filter(|(name, _)| content.contains(name.as_str()))
            .map(|(_, importance)| importance * weight)
            .sum();

        if boost > 0.0 {
            chunk.score *= 1.0 + boost;
        }
    }
}

/// Deterministic final ordering: score descending, chunk id as tiebreak
pub fn sort_by_score(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Full finalize pass: boost, dedup, sort, truncate
///
/// A deduplicator failure keeps the undeduplicated set; re-ranking must
/// never lose evidence to an auxiliary stage.
pub async fn finalize(
    mut chunks: Vec<Chunk>,
    entities: &[String],
    importance: &HashMap<String, f32>,
    weight: f32,
    dedup: Option<&SharedDeduplicator>,
    limit: usize,
) -> Vec<Chunk> {
    apply_entity_boost(&mut chunks, entities, importance, weight);

    if let Some(dedup) = dedup {
        match dedup.dedup(chunks.clone()).await {
            Ok(deduped) => chunks = deduped,
            Err(e) => {
                tracing::warn!(error = %e, "Dedup failed, keeping full candidate set");
            }
        }
    }

    sort_by_score(&mut chunks);
    chunks.truncate(limit);
    chunks
}
