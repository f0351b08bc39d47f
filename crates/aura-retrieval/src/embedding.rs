//! Pluggable embedding provider plus a bounded, content-hash-keyed memoization
//! cache (spec §4.5 step 1). Supporting arbitrary third-party embedding
//! providers is explicitly out of scope; the trait exists so the mock and
//! the one production provider share a seam, not to host a plugin
//! ecosystem.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ahash::AHasher;
use async_trait::async_trait;
use lru::LruCache;
use std::hash::Hasher;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn dimension(&self) -> usize;
}

/// Deterministic hash-based embedding for tests and offline operation: each
/// dimension is derived from a seeded hash of the text so identical input
/// always produces an identical vector without a live model.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let mut hasher = AHasher::default();
            hasher.write(text.as_bytes());
            hasher.write_usize(i);
            let bits = hasher.finish();
            // Map to [-1.0, 1.0].
            v.push(((bits % 2000) as f32 / 1000.0) - 1.0);
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = AHasher::default();
    hasher.write(text.as_bytes());
    format!("{:016x}", hasher.finish())
}

struct CacheEntry {
    embedding: Vec<f32>,
    inserted_at: std::time::Instant,
}

/// Wraps an [`EmbeddingProvider`] with a bounded LRU cache keyed by
/// `(tenant, content_hash)`, so repeated struggle/audit windows over the
/// same error text or code context don't re-embed.
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<(Option<Uuid>, String), CacheEntry>>,
    ttl: std::time::Duration,
}

impl CachedEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize, ttl_seconds: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity must be non-zero");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl: std::time::Duration::from_secs(ttl_seconds),
        }
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    pub async fn embed(&self, tenant: Option<Uuid>, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = (tenant, content_hash(text));
        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.inserted_at.elapsed() < self.ttl {
                    return Ok(entry.embedding.clone());
                }
            }
        }
        let embedding = self.inner.embed(text).await?;
        let mut cache = self.cache.lock().await;
        cache.put(
            key,
            CacheEntry {
                embedding: embedding.clone(),
                inserted_at: std::time::Instant::now(),
            },
        );
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let provider = MockEmbeddingProvider::new(8);
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn distinct_text_yields_distinct_embeddings() {
        let provider = MockEmbeddingProvider::new(8);
        let a = provider.embed("hello").await.unwrap();
        let b = provider.embed("goodbye").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cache_returns_same_vector_without_recomputing() {
        let cached = CachedEmbeddingProvider::new(Arc::new(MockEmbeddingProvider::new(4)), 16, 3600);
        let tenant = Some(Uuid::new_v4());
        let a = cached.embed(tenant, "struggle text").await.unwrap();
        let b = cached.embed(tenant, "struggle text").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn distinct_tenants_do_not_share_cache_entries_by_key() {
        let cached = CachedEmbeddingProvider::new(Arc::new(MockEmbeddingProvider::new(4)), 16, 3600);
        let t1 = Some(Uuid::new_v4());
        let t2 = Some(Uuid::new_v4());
        // Same text, different tenants: both should resolve to the same
        // deterministic vector (the mock ignores tenant) but via distinct
        // cache keys, exercised here only to confirm no panic/collision.
        let a = cached.embed(t1, "same text").await.unwrap();
        let b = cached.embed(t2, "same text").await.unwrap();
        assert_eq!(a, b);
    }
}
