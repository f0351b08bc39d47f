//! The two retrieval operations pipelines call into (spec §4.5):
//! `retrieve_knowledge` for the Audit Pipeline's per-candidate Golden-Path
//! lookup, `retrieve_contextual_lesson` for the Struggle Detector's Lesson
//! Synthesizer. Both share the embed → candidate-scan → rerank → truncate
//! pipeline; they differ only in how the query text and tag filter are
//! assembled.

use std::sync::Arc;
use std::time::Duration;

use aura_core::types::{Difficulty, KnowledgeChunk};
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::CachedEmbeddingProvider;
use crate::index::KnowledgeIndex;
use crate::rerank::{rerank, RerankWeights};

pub struct RetrievalResult {
    pub chunks: Vec<KnowledgeChunk>,
    /// Set when the retrieval round-trip exceeded its timeout budget; a
    /// pipeline that sees this must degrade rather than fail outright.
    pub degraded: bool,
}

pub struct KnowledgeRetrieval {
    embeddings: Arc<CachedEmbeddingProvider>,
    index: Arc<KnowledgeIndex>,
    weights: RerankWeights,
    top_k_default: usize,
    top_k_max: usize,
    timeout: Duration,
}

impl KnowledgeRetrieval {
    pub fn new(
        embeddings: Arc<CachedEmbeddingProvider>,
        index: Arc<KnowledgeIndex>,
        top_k_default: usize,
        top_k_max: usize,
        timeout_ms: u64,
    ) -> Self {
        Self {
            embeddings,
            index,
            weights: RerankWeights::default(),
            top_k_default,
            top_k_max,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn clamp_top_k(&self, top_k: Option<usize>) -> usize {
        top_k.unwrap_or(self.top_k_default).clamp(1, self.top_k_max)
    }

    /// `retrieve_knowledge(tenant, query, error_patterns?, top_k)`.
    pub async fn retrieve_knowledge(
        &self,
        tenant: Uuid,
        query: &str,
        error_patterns: &[String],
        top_k: Option<usize>,
    ) -> RetrievalResult {
        self.run(tenant, query, error_patterns, self.clamp_top_k(top_k))
            .await
    }

    /// `retrieve_contextual_lesson(tenant, error_type, code_context, user_level)`.
    /// The query is the composite of error type and code context; difficulty
    /// is derived from `user_level` and used as an additional required tag
    /// so beginners aren't handed advanced-only material.
    pub async fn retrieve_contextual_lesson(
        &self,
        tenant: Uuid,
        error_type: &str,
        code_context: &str,
        user_level: Difficulty,
    ) -> RetrievalResult {
        let query = format!("{error_type}\n{code_context}");
        let tags = vec![difficulty_tag(user_level)];
        self.run(tenant, &query, &tags, self.top_k_default).await
    }

    async fn run(
        &self,
        tenant: Uuid,
        query: &str,
        required_tags: &[String],
        top_k: usize,
    ) -> RetrievalResult {
        let outcome = tokio::time::timeout(self.timeout, self.run_inner(tenant, query, required_tags, top_k)).await;
        match outcome {
            Ok(chunks) => RetrievalResult {
                chunks,
                degraded: false,
            },
            Err(_elapsed) => RetrievalResult {
                chunks: Vec::new(),
                degraded: true,
            },
        }
    }

    async fn run_inner(
        &self,
        tenant: Uuid,
        query: &str,
        required_tags: &[String],
        top_k: usize,
    ) -> Vec<KnowledgeChunk> {
        let query_embedding = match self.embeddings.embed(Some(tenant), query).await {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        let candidates = self.index.candidates(tenant, required_tags).await;
        let with_recency: Vec<_> = candidates.into_iter().map(|c| (c, None)).collect();
        let ranked = rerank(with_recency, &query_embedding, required_tags, self.weights, Utc::now());
        ranked.into_iter().take(top_k).collect()
    }
}

fn difficulty_tag(level: Difficulty) -> String {
    match level {
        Difficulty::Beginner => "difficulty:beginner".to_string(),
        Difficulty::Intermediate => "difficulty:intermediate".to_string(),
        Difficulty::Advanced => "difficulty:advanced".to_string(),
    }
}
