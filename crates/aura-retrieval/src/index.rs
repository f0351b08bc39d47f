//! Knowledge Index: per-tenant and global namespaces of [`KnowledgeChunk`],
//! queried together at search time (spec §4.5 step 2).
//!
//! Ingestion uses a single-writer discipline (a `tokio::sync::RwLock` write
//! guard held for the whole batch) so a query that starts after an ingest
//! commits always observes it — read-after-write within a tenant. Queries
//! concurrent with an ingest see either the pre- or post-ingest state, never
//! a torn mix.

use std::collections::HashMap;
use std::sync::Arc;

use aura_core::types::KnowledgeChunk;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("embedding dimension mismatch: index expects {expected}, chunk has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

struct IndexState {
    global: Vec<KnowledgeChunk>,
    by_tenant: HashMap<Uuid, Vec<KnowledgeChunk>>,
}

pub struct KnowledgeIndex {
    dimension: usize,
    state: Arc<RwLock<IndexState>>,
}

impl KnowledgeIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: Arc::new(RwLock::new(IndexState {
                global: Vec::new(),
                by_tenant: HashMap::new(),
            })),
        }
    }

    /// Ingests a batch of chunks. Rejects the whole batch if any chunk's
    /// embedding dimension doesn't match the index (fail before any commit).
    pub async fn ingest(&self, chunks: Vec<KnowledgeChunk>) -> Result<(), IndexError> {
        for chunk in &chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: chunk.embedding.len(),
                });
            }
        }
        let mut state = self.state.write().await;
        for chunk in chunks {
            match chunk.tenant_id {
                Some(tenant_id) => state.by_tenant.entry(tenant_id).or_default().push(chunk),
                None => state.global.push(chunk),
            }
        }
        Ok(())
    }

    /// Returns every chunk visible to `tenant` (its own chunks plus the
    /// global namespace) whose tags satisfy `required_tags` (all must be
    /// present; an empty filter admits every chunk).
    pub async fn candidates(&self, tenant: Uuid, required_tags: &[String]) -> Vec<KnowledgeChunk> {
        let state = self.state.read().await;
        state
            .global
            .iter()
            .chain(state.by_tenant.get(&tenant).into_iter().flatten())
            .filter(|chunk| required_tags.iter().all(|tag| chunk.tags.contains(tag)))
            .cloned()
            .collect()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
