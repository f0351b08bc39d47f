//! Reranks the candidate pool returned by the index's nearest-neighbor scan:
//! a weighted sum of similarity, tag-match count, and recency decay, with a
//! deterministic tie-break on chunk id (spec §4.5 step 3).

use aura_core::types::KnowledgeChunk;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::index::cosine_similarity;

#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub similarity: f32,
    pub tag_match: f32,
    pub recency: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.7,
            tag_match: 0.2,
            recency: 0.1,
        }
    }
}

/// A chunk's ingest time is not modeled on `KnowledgeChunk` itself (the
/// index doesn't track it); callers that care about recency decay pass it
/// alongside the chunk. Callers indifferent to recency pass `None` per
/// chunk, which contributes a neutral score of 0.
pub fn rerank(
    candidates: Vec<(KnowledgeChunk, Option<DateTime<Utc>>)>,
    query_embedding: &[f32],
    query_tags: &[String],
    weights: RerankWeights,
    now: DateTime<Utc>,
) -> Vec<KnowledgeChunk> {
    let mut scored: Vec<(f32, Uuid, KnowledgeChunk)> = candidates
        .into_iter()
        .map(|(chunk, ingested_at)| {
            let similarity = cosine_similarity(query_embedding, &chunk.embedding);
            let tag_match = query_tags
                .iter()
                .filter(|tag| chunk.tags.contains(tag))
                .count() as f32;
            let recency = ingested_at
                .map(|t| recency_decay(now, t))
                .unwrap_or(0.0);
            let score = weights.similarity * similarity
                + weights.tag_match * tag_match
                + weights.recency * recency;
            (score, chunk.id, chunk)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    scored.into_iter().map(|(_, _, chunk)| chunk).collect()
}

/// Exponential decay over days since ingest, halving roughly every 30 days.
fn recency_decay(now: DateTime<Utc>, ingested_at: DateTime<Utc>) -> f32 {
    let age_days = (now - ingested_at).num_seconds().max(0) as f32 / 86_400.0;
    (-age_days / 30.0).exp()
}
