//! Enumerated configuration record for the Intervention Orchestrator.
//!
//! Replaces dynamic attribute access on config objects (a source pattern
//! flagged for re-architecture) with a fixed, `serde`-validated record.
//! Every option named in the specification's "recognized options" list is
//! represented by exactly one field below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gatekeeper: GatekeeperConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub struggle: StruggleConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            gatekeeper: GatekeeperConfig::default(),
            workflow: WorkflowConfig::default(),
            struggle: StruggleConfig::default(),
            audit: AuditConfig::default(),
            retrieval: RetrievalConfig::default(),
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.aura/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".aura")
            .join("config.toml")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// general
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// store (Session & Quota Store)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// TTL for `result:<fingerprint>` entries (also the retention for
    /// Intervention records). Spec §9 open question: no default was
    /// implied by the source; 7 days is adopted here — see DESIGN.md.
    #[serde(default = "default_result_ttl_seconds")]
    pub result_ttl_seconds: u64,
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            result_ttl_seconds: default_result_ttl_seconds(),
            session_ttl_seconds: default_session_ttl_seconds(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn default_key_prefix() -> String {
    "aura".into()
}
fn default_result_ttl_seconds() -> u64 {
    7 * 24 * 3600
}
fn default_session_ttl_seconds() -> u64 {
    30 * 24 * 3600
}

// ---------------------------------------------------------------------------
// gatekeeper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    #[serde(default = "default_coalescence_ttl_seconds")]
    pub coalescence_ttl_seconds: u64,
    #[serde(default = "default_bucket_capacity_default")]
    pub bucket_capacity_default: u32,
    #[serde(default = "default_bucket_refill_rate_default")]
    pub bucket_refill_rate_default: f64,
    #[serde(default = "default_max_inflight_per_tenant")]
    pub max_inflight_per_tenant: u32,
    #[serde(default = "default_max_inflight_global")]
    pub max_inflight_global: u32,
    /// Bounded backoff budget for transient backend failures before a
    /// `backend_unavailable` error is surfaced.
    #[serde(default = "default_backend_retry_budget_ms")]
    pub backend_retry_budget_ms: u64,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            coalescence_ttl_seconds: default_coalescence_ttl_seconds(),
            bucket_capacity_default: default_bucket_capacity_default(),
            bucket_refill_rate_default: default_bucket_refill_rate_default(),
            max_inflight_per_tenant: default_max_inflight_per_tenant(),
            max_inflight_global: default_max_inflight_global(),
            backend_retry_budget_ms: default_backend_retry_budget_ms(),
        }
    }
}

fn default_coalescence_ttl_seconds() -> u64 {
    120
}
fn default_bucket_capacity_default() -> u32 {
    60
}
fn default_bucket_refill_rate_default() -> f64 {
    1.0
}
fn default_max_inflight_per_tenant() -> u32 {
    16
}
fn default_max_inflight_global() -> u32 {
    512
}
fn default_backend_retry_budget_ms() -> u64 {
    2_000
}

// ---------------------------------------------------------------------------
// workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_node_max_attempts")]
    pub node_max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_cancellation_grace_seconds")]
    pub cancellation_grace_seconds: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            node_max_attempts: default_node_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            cancellation_grace_seconds: default_cancellation_grace_seconds(),
        }
    }
}

fn default_worker_count() -> usize {
    8
}
fn default_node_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_cancellation_grace_seconds() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// struggle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StruggleConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_edit_freq_min")]
    pub edit_freq_min: u64,
    #[serde(default = "default_distinct_errors_min")]
    pub distinct_errors_min: u64,
    #[serde(default = "default_min_duration_seconds")]
    pub min_duration_seconds: u64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
}

impl Default for StruggleConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            edit_freq_min: default_edit_freq_min(),
            distinct_errors_min: default_distinct_errors_min(),
            min_duration_seconds: default_min_duration_seconds(),
            cooldown_seconds: default_cooldown_seconds(),
            max_body_chars: default_max_body_chars(),
        }
    }
}

fn default_window_seconds() -> u64 {
    60
}
fn default_edit_freq_min() -> u64 {
    10
}
fn default_distinct_errors_min() -> u64 {
    3
}
fn default_min_duration_seconds() -> u64 {
    10
}
fn default_cooldown_seconds() -> u64 {
    600
}
fn default_max_body_chars() -> usize {
    4_000
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_verdict_confidence_threshold")]
    pub verdict_confidence_threshold: f64,
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            verdict_confidence_threshold: default_verdict_confidence_threshold(),
            max_diff_bytes: default_max_diff_bytes(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_verdict_confidence_threshold() -> f64 {
    0.85
}
fn default_max_diff_bytes() -> usize {
    512 * 1024
}
fn default_similarity_threshold() -> f64 {
    0.6
}

// ---------------------------------------------------------------------------
// retrieval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_retrieval_top_k_default")]
    pub retrieval_top_k_default: usize,
    #[serde(default = "default_retrieval_top_k_max")]
    pub retrieval_top_k_max: usize,
    #[serde(default = "default_embedding_cache_capacity")]
    pub embedding_cache_capacity: usize,
    #[serde(default = "default_embedding_cache_ttl_seconds")]
    pub embedding_cache_ttl_seconds: u64,
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: default_embedding_dimension(),
            retrieval_top_k_default: default_retrieval_top_k_default(),
            retrieval_top_k_max: default_retrieval_top_k_max(),
            embedding_cache_capacity: default_embedding_cache_capacity(),
            embedding_cache_ttl_seconds: default_embedding_cache_ttl_seconds(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
        }
    }
}

fn default_embedding_dimension() -> usize {
    1536
}
fn default_retrieval_top_k_default() -> usize {
    3
}
fn default_retrieval_top_k_max() -> usize {
    10
}
fn default_embedding_cache_capacity() -> usize {
    4_096
}
fn default_embedding_cache_ttl_seconds() -> u64 {
    3_600
}
fn default_retrieval_timeout_ms() -> u64 {
    1_500
}

// ---------------------------------------------------------------------------
// synthesis (the LLM call both pipelines' composer nodes make)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_model")]
    pub model: String,
    #[serde(default = "default_synthesis_max_tokens")]
    pub max_tokens: u32,
    /// Pinned rather than left to provider default, so a resumed job's
    /// re-issued completion is reproducible modulo provider nondeterminism.
    #[serde(default = "default_synthesis_temperature")]
    pub temperature: f32,
    /// Upper bound on how much cited chunk text is folded into the prompt.
    #[serde(default = "default_synthesis_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: default_synthesis_model(),
            max_tokens: default_synthesis_max_tokens(),
            temperature: default_synthesis_temperature(),
            max_prompt_chars: default_synthesis_max_prompt_chars(),
        }
    }
}

fn default_synthesis_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_synthesis_max_tokens() -> u32 {
    512
}
fn default_synthesis_temperature() -> f32 {
    0.0
}
fn default_synthesis_max_prompt_chars() -> usize {
    6_000
}
