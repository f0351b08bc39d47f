//! Struggle Detector Pipeline (spec §4.3): `assemble -> classify ->
//! {terminal(none) | retrieve -> synthesize -> terminal(lesson)}`.

use std::sync::Arc;

use aura_core::config::{StruggleConfig, SynthesisConfig};
use aura_core::error::ErrorKind;
use aura_core::types::{
    Difficulty, Intervention, InterventionKind, Severity, TelemetryWindow, UserLevel,
};
use aura_retrieval::{KnowledgeRetrieval, LlmConfig, LlmMessage, LlmProvider};
use aura_store::backend::StoreBackend;
use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::graph::{GraphSpec, Node, NodeError, NodeOutcome};

#[derive(Debug, Clone)]
pub struct StruggleState {
    pub tenant: Uuid,
    pub window: TelemetryWindow,
    pub user_level: UserLevel,
    pub edit_frequency: u64,
    pub distinct_errors: Vec<String>,
    pub dominant_signature: Option<String>,
    pub retrieved_chunk_ids: Vec<Uuid>,
    pub retrieved_texts: Vec<String>,
    pub degraded: bool,
}

impl StruggleState {
    pub fn new(tenant: Uuid, window: TelemetryWindow, user_level: UserLevel) -> Self {
        Self {
            tenant,
            window,
            user_level,
            edit_frequency: 0,
            distinct_errors: Vec::new(),
            dominant_signature: None,
            retrieved_chunk_ids: Vec::new(),
            retrieved_texts: Vec::new(),
            degraded: false,
        }
    }
}

// Allow StruggleState to ride through the generic checkpoint store, which
// requires Serialize/Deserialize; TelemetryWindow and UserLevel already are.
impl serde::Serialize for StruggleState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("StruggleState", 8)?;
        s.serialize_field("tenant", &self.tenant)?;
        s.serialize_field("window", &self.window)?;
        s.serialize_field("user_level", &self.user_level)?;
        s.serialize_field("edit_frequency", &self.edit_frequency)?;
        s.serialize_field("distinct_errors", &self.distinct_errors)?;
        s.serialize_field("dominant_signature", &self.dominant_signature)?;
        s.serialize_field("retrieved_chunk_ids", &self.retrieved_chunk_ids)?;
        s.serialize_field("retrieved_texts", &self.retrieved_texts)?;
        s.end()
    }
}

impl<'de> serde::Deserialize<'de> for StruggleState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct Raw {
            tenant: Uuid,
            window: TelemetryWindow,
            user_level: UserLevel,
            edit_frequency: u64,
            distinct_errors: Vec<String>,
            dominant_signature: Option<String>,
            retrieved_chunk_ids: Vec<Uuid>,
            retrieved_texts: Vec<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(StruggleState {
            tenant: raw.tenant,
            window: raw.window,
            user_level: raw.user_level,
            edit_frequency: raw.edit_frequency,
            distinct_errors: raw.distinct_errors,
            dominant_signature: raw.dominant_signature,
            retrieved_chunk_ids: raw.retrieved_chunk_ids,
            retrieved_texts: raw.retrieved_texts,
            degraded: false,
        })
    }
}

fn user_level_to_difficulty(level: UserLevel) -> Difficulty {
    match level {
        UserLevel::Beginner => Difficulty::Beginner,
        UserLevel::Intermediate => Difficulty::Intermediate,
        UserLevel::Advanced => Difficulty::Advanced,
    }
}

// ---------------------------------------------------------------------------
// Window Assembler
// ---------------------------------------------------------------------------

pub struct WindowAssemblerNode {
    window_seconds: u64,
}

impl WindowAssemblerNode {
    pub fn new(window_seconds: u64) -> Self {
        Self { window_seconds }
    }
}

#[async_trait]
impl Node<StruggleState> for WindowAssemblerNode {
    fn name(&self) -> &'static str {
        "assemble"
    }

    async fn run(&self, mut state: StruggleState) -> Result<NodeOutcome<StruggleState>, NodeError> {
        state
            .window
            .evict_older_than(Utc::now(), self.window_seconds as i64);
        state.edit_frequency = state.window.edit_frequency();
        state.distinct_errors = state.window.distinct_error_signatures();
        Ok(NodeOutcome::Advance {
            next: "classify".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Threshold Classifier
// ---------------------------------------------------------------------------

/// Checks whether a signature is in cooldown and records a firing.
#[async_trait]
pub trait CooldownGate: Send + Sync {
    async fn in_cooldown(&self, tenant: Uuid, signature: &str) -> Result<bool, NodeError>;
    async fn mark_fired(&self, tenant: Uuid, signature: &str, cooldown_seconds: u64) -> Result<(), NodeError>;
}

pub struct StoreCooldownGate {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
}

impl StoreCooldownGate {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: &str) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn key(&self, tenant: Uuid, signature: &str) -> String {
        format!("{}:cooldown:{tenant}:{signature}", self.key_prefix)
    }
}

#[async_trait]
impl CooldownGate for StoreCooldownGate {
    async fn in_cooldown(&self, tenant: Uuid, signature: &str) -> Result<bool, NodeError> {
        self.backend
            .get(&self.key(tenant, signature))
            .await
            .map(|v| v.is_some())
            .map_err(|e| NodeError::new(ErrorKind::Transient, e.to_string()))
    }

    async fn mark_fired(&self, tenant: Uuid, signature: &str, cooldown_seconds: u64) -> Result<(), NodeError> {
        self.backend
            .set_ex(&self.key(tenant, signature), "1".to_string(), cooldown_seconds)
            .await
            .map_err(|e| NodeError::new(ErrorKind::Transient, e.to_string()))
    }
}

pub struct ThresholdClassifierNode {
    config: StruggleConfig,
    cooldown: Arc<dyn CooldownGate>,
}

impl ThresholdClassifierNode {
    pub fn new(config: StruggleConfig, cooldown: Arc<dyn CooldownGate>) -> Self {
        Self { config, cooldown }
    }
}

#[async_trait]
impl Node<StruggleState> for ThresholdClassifierNode {
    fn name(&self) -> &'static str {
        "classify"
    }

    async fn run(&self, mut state: StruggleState) -> Result<NodeOutcome<StruggleState>, NodeError> {
        let duration = state.window.duration_seconds() as u64;
        let meets_threshold = state.edit_frequency >= self.config.edit_freq_min
            && state.distinct_errors.len() as u64 >= self.config.distinct_errors_min
            && duration >= self.config.min_duration_seconds;

        if !meets_threshold {
            return Ok(NodeOutcome::Terminal(None));
        }

        // Tie-break: the error signature with the latest `received_ts` in
        // the window, not a lexicographic pick off the sorted/deduped
        // `distinct_errors` list (which carries no recency information).
        let dominant = state.window.most_recent_error_signature();
        let Some(signature) = dominant else {
            return Ok(NodeOutcome::Terminal(None));
        };

        if self.cooldown.in_cooldown(state.tenant, &signature).await? {
            return Ok(NodeOutcome::Terminal(None));
        }
        self.cooldown
            .mark_fired(state.tenant, &signature, self.config.cooldown_seconds)
            .await?;

        state.dominant_signature = Some(signature);
        Ok(NodeOutcome::Advance {
            next: "retrieve".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

pub struct RetrievalNode {
    retrieval: Arc<KnowledgeRetrieval>,
}

impl RetrievalNode {
    pub fn new(retrieval: Arc<KnowledgeRetrieval>) -> Self {
        Self { retrieval }
    }
}

#[async_trait]
impl Node<StruggleState> for RetrievalNode {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn run(&self, mut state: StruggleState) -> Result<NodeOutcome<StruggleState>, NodeError> {
        let signature = state.dominant_signature.clone().unwrap_or_default();
        let code_context = state
            .window
            .events
            .iter()
            .rev()
            .find_map(|e| e.payload.get("code_context").and_then(|v| v.as_str()))
            .unwrap_or("")
            .to_string();

        let result = self
            .retrieval
            .retrieve_contextual_lesson(
                state.tenant,
                &signature,
                &code_context,
                user_level_to_difficulty(state.user_level),
            )
            .await;

        state.degraded = result.degraded;
        state.retrieved_chunk_ids = result.chunks.iter().map(|c| c.id).collect();
        state.retrieved_texts = result.chunks.into_iter().map(|c| c.text).collect();

        Ok(NodeOutcome::Advance {
            next: "synthesize".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Lesson Synthesizer
// ---------------------------------------------------------------------------

fn fallback_body(signature: &str) -> String {
    format!(
        "You've hit `{signature}` a few times in this session. Take a moment to review the relevant docs before continuing."
    )
}

/// Builds the bounded prompt the Lesson Synthesizer hands to the model:
/// the struggling signature plus as much cited chunk text as fits under
/// `max_prompt_chars`. Cited text is truncated, never the signature, so
/// the model always knows what it's explaining even if context is thin.
fn bounded_lesson_prompt(signature: &str, retrieved_texts: &[String], max_prompt_chars: usize) -> String {
    let header = format!(
        "A developer has repeatedly hit the error `{signature}`. Using only the reference material below, write a short, encouraging lesson (a few sentences) that helps them understand and resolve it. Do not invent facts not present in the material.\n\nReference material:\n"
    );
    let mut prompt = header;
    let budget = max_prompt_chars.saturating_sub(prompt.len());
    let mut context = retrieved_texts.join("\n\n");
    context.truncate(budget);
    prompt.push_str(&context);
    prompt
}

pub struct LessonSynthesizerNode {
    max_body_chars: usize,
    llm: Arc<dyn LlmProvider>,
    synthesis: SynthesisConfig,
}

impl LessonSynthesizerNode {
    pub fn new(max_body_chars: usize, llm: Arc<dyn LlmProvider>, synthesis: SynthesisConfig) -> Self {
        Self {
            max_body_chars,
            llm,
            synthesis,
        }
    }
}

#[async_trait]
impl Node<StruggleState> for LessonSynthesizerNode {
    fn name(&self) -> &'static str {
        "synthesize"
    }

    async fn run(&self, mut state: StruggleState) -> Result<NodeOutcome<StruggleState>, NodeError> {
        let signature = state
            .dominant_signature
            .clone()
            .unwrap_or_else(|| "this error".to_string());

        let mut body = if state.retrieved_texts.is_empty() {
            fallback_body(&signature)
        } else {
            let prompt = bounded_lesson_prompt(&signature, &state.retrieved_texts, self.synthesis.max_prompt_chars);
            let messages = vec![LlmMessage::user(prompt)];
            let config = LlmConfig {
                model: self.synthesis.model.clone(),
                max_tokens: self.synthesis.max_tokens,
                temperature: self.synthesis.temperature,
                system_prompt: Some(
                    "You are Aura, a concise in-editor coding mentor. Cite only the material you're given.".to_string(),
                ),
            };
            match self.llm.complete(&messages, &config).await {
                Ok(response) => response.content,
                Err(e) => {
                    warn!(error = %e, %signature, "lesson synthesis call failed; degrading to a deterministic lesson body");
                    state.degraded = true;
                    fallback_body(&signature)
                }
            }
        };
        body.truncate(self.max_body_chars);

        let intervention = Intervention {
            fingerprint: String::new(), // stamped by the runtime once terminal.
            kind: InterventionKind::Lesson,
            severity: Severity::Info,
            body,
            cited_chunk_ids: state.retrieved_chunk_ids.clone(),
            remediation_snippets: Vec::new(),
            produced_at: Utc::now(),
            degraded: state.degraded,
            violation_candidates: Vec::new(),
        };

        Ok(NodeOutcome::Terminal(Some(intervention)))
    }
}

pub fn build_struggle_graph(
    config: StruggleConfig,
    cooldown: Arc<dyn CooldownGate>,
    retrieval: Arc<KnowledgeRetrieval>,
    llm: Arc<dyn LlmProvider>,
    synthesis: SynthesisConfig,
) -> GraphSpec<StruggleState> {
    GraphSpec::new(
        "assemble",
        vec![
            Arc::new(WindowAssemblerNode::new(config.window_seconds)),
            Arc::new(ThresholdClassifierNode::new(config.clone(), cooldown)),
            Arc::new(RetrievalNode::new(retrieval)),
            Arc::new(LessonSynthesizerNode::new(config.max_body_chars, llm, synthesis)),
        ],
    )
}
