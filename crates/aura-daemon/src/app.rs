//! Assembles the Intervention Orchestrator's dependency graph from a
//! loaded [`Config`](aura_core::config::Config): storage backend, retrieval
//! stack, Gatekeeper, and Workflow Runtime, leaf-first per the component
//! dependency order (Knowledge Index -> Session & Quota Store ->
//! Gatekeeper -> Workflow Runtime).

use std::sync::Arc;

use aura_core::config::Config;
use aura_gatekeeper::Gatekeeper;
use aura_retrieval::{
    AnthropicProvider, CachedEmbeddingProvider, KnowledgeIndex, KnowledgeRetrieval, LlmMockProvider,
    LlmProvider, MockEmbeddingProvider,
};
use aura_store::{InMemoryBackend, RedisBackend, StoreBackend, SubscriptionBus};
use aura_workflow::runtime::WorkflowRuntime;
use tracing::warn;

pub struct App {
    pub config: Config,
    pub gatekeeper: Arc<Gatekeeper>,
    pub workflow: Arc<WorkflowRuntime>,
    pub bus: Arc<SubscriptionBus>,
}

impl App {
    /// Builds the full dependency graph. Falls back to an in-process
    /// store when Redis is unreachable, matching the rest of this
    /// workspace's "degrade, don't crash on startup" posture -- a daemon
    /// started before its Redis sidecar is ready should come up serving
    /// out of memory rather than fail to start.
    pub async fn build(config: Config) -> Self {
        let backend: Arc<dyn StoreBackend> = match RedisBackend::connect(&config.store.redis_url).await {
            Ok(redis) => {
                tracing::info!(redis_url = %config.store.redis_url, "connected to Redis store backend");
                Arc::new(redis)
            }
            Err(err) => {
                warn!(error = %err, "redis unavailable, falling back to in-memory store backend");
                Arc::new(InMemoryBackend::new())
            }
        };

        let embeddings = Arc::new(CachedEmbeddingProvider::new(
            Arc::new(MockEmbeddingProvider::new(config.retrieval.embedding_dimension)),
            config.retrieval.embedding_cache_capacity,
            config.retrieval.embedding_cache_ttl_seconds,
        ));
        let index = Arc::new(KnowledgeIndex::new(config.retrieval.embedding_dimension));
        let retrieval = Arc::new(KnowledgeRetrieval::new(
            embeddings,
            index,
            config.retrieval.retrieval_top_k_default,
            config.retrieval.retrieval_top_k_max,
            config.retrieval.retrieval_timeout_ms,
        ));

        let bus = Arc::new(SubscriptionBus::new());

        // Mock-by-default, pluggable for production, matching the rest of
        // this workspace's posture toward external dependencies (compare
        // `MockEmbeddingProvider` above): a daemon started without an
        // Anthropic key still comes up and synthesizes interventions, just
        // with a deterministic placeholder body instead of a model call.
        let llm: Arc<dyn LlmProvider> = match std::env::var("AURA_ANTHROPIC_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => {
                tracing::info!("using AnthropicProvider for Intervention synthesis");
                Arc::new(AnthropicProvider::new(api_key))
            }
            _ => {
                warn!("AURA_ANTHROPIC_API_KEY not set, falling back to a mock LLM provider");
                Arc::new(LlmMockProvider::new())
            }
        };

        let workflow = Arc::new(WorkflowRuntime::new(
            backend.clone(),
            &config.store.key_prefix,
            config.workflow.clone(),
            config.struggle.clone(),
            config.audit.clone(),
            &config.gatekeeper,
            retrieval,
            llm,
            config.synthesis.clone(),
            config.store.result_ttl_seconds,
            bus.clone(),
        ));

        let gatekeeper = Arc::new(Gatekeeper::new(
            backend,
            &config.store.key_prefix,
            config.gatekeeper.coalescence_ttl_seconds,
            config.store.result_ttl_seconds,
            config.gatekeeper.coalescence_ttl_seconds as i64,
            workflow.clone(),
        ));

        Self {
            config,
            gatekeeper,
            workflow,
            bus,
        }
    }
}
