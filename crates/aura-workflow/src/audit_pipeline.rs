//! Audit Pipeline (spec §4.4): `parse -> prefilter -> retrieve -> verdict ->
//! remediate -> terminal`. Producess a single `violation_report`
//! Intervention covering every candidate the diff raised, rather than one
//! Intervention per candidate.

use std::sync::Arc;

use aura_core::config::{AuditConfig, SynthesisConfig};
use aura_core::error::ErrorKind;
use aura_core::types::{
    DiffArtifact, Intervention, InterventionKind, RemediationSnippet, RuleSeverity, Severity,
    Verdict, ViolationCandidate,
};
use aura_retrieval::{KnowledgeRetrieval, LlmConfig, LlmMessage, LlmProvider};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::graph::{Node, NodeError, NodeOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditState {
    pub tenant: Uuid,
    pub artifact: DiffArtifact,
    pub candidates: Vec<ScoredCandidate>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: ViolationCandidate,
    pub cited_chunk_ids: Vec<Uuid>,
    pub remediation_code: Option<String>,
    /// Set when this candidate's own retrieval call timed out or otherwise
    /// failed, as distinct from a retrieval that genuinely found nothing.
    /// Drives the verdict's failure-semantics branch (warn, no remediation)
    /// instead of letting it collapse into a plain uncited dismissal.
    pub retrieval_degraded: bool,
}

impl AuditState {
    pub fn new(tenant: Uuid, artifact: DiffArtifact) -> Self {
        Self {
            tenant,
            artifact,
            candidates: Vec::new(),
            degraded: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Diff Parser
// ---------------------------------------------------------------------------

pub struct DiffParserNode {
    max_diff_bytes: usize,
}

impl DiffParserNode {
    pub fn new(max_diff_bytes: usize) -> Self {
        Self { max_diff_bytes }
    }
}

const SECRET_PATTERNS: &[&str] = &["BEGIN PRIVATE KEY", "aws_secret_access_key", "-----BEGIN RSA"];

#[async_trait]
impl Node<AuditState> for DiffParserNode {
    fn name(&self) -> &'static str {
        "parse"
    }

    async fn run(&self, state: AuditState) -> Result<NodeOutcome<AuditState>, NodeError> {
        if state.artifact.unified_diff.len() > self.max_diff_bytes {
            return Err(NodeError::new(
                ErrorKind::Validation,
                format!(
                    "diff of {} bytes exceeds max_diff_bytes ({})",
                    state.artifact.unified_diff.len(),
                    self.max_diff_bytes
                ),
            ));
        }
        if SECRET_PATTERNS
            .iter()
            .any(|p| state.artifact.unified_diff.contains(p))
        {
            return Err(NodeError::new(
                ErrorKind::Validation,
                "diff appears to contain embedded secret material".to_string(),
            ));
        }
        Ok(NodeOutcome::Advance {
            next: "prefilter".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Rule Prefilter
// ---------------------------------------------------------------------------

struct Rule {
    id: &'static str,
    severity: RuleSeverity,
    matches: fn(&str) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        id: "banned-api-unwrap",
        severity: RuleSeverity::Medium,
        matches: |line| line.contains(".unwrap()") && line.trim_start().starts_with('+'),
    },
    Rule {
        id: "hardcoded-credential",
        severity: RuleSeverity::High,
        matches: |line| {
            line.trim_start().starts_with('+')
                && (line.contains("password = \"") || line.contains("api_key = \""))
        },
    },
    Rule {
        id: "oversized-function-marker",
        severity: RuleSeverity::Low,
        matches: |line| line.trim_start().starts_with('+') && line.contains("fn ") && line.len() > 200,
    },
];

pub struct RulePrefilterNode;

#[async_trait]
impl Node<AuditState> for RulePrefilterNode {
    fn name(&self) -> &'static str {
        "prefilter"
    }

    async fn run(&self, mut state: AuditState) -> Result<NodeOutcome<AuditState>, NodeError> {
        for (line_no, line) in state.artifact.unified_diff.lines().enumerate() {
            for rule in RULES {
                if (rule.matches)(line) {
                    state.candidates.push(ScoredCandidate {
                        candidate: ViolationCandidate {
                            rule_id: rule.id.to_string(),
                            file_path: state.artifact.file_path.clone(),
                            line: (line_no + 1) as u32,
                            rule_severity: rule.severity,
                            verdict_severity: Severity::Warn,
                            verdict: Verdict::Accept,
                        },
                        cited_chunk_ids: Vec::new(),
                        remediation_code: None,
                        retrieval_degraded: false,
                    });
                }
            }
        }

        if state.candidates.is_empty() {
            return Ok(NodeOutcome::Terminal(None));
        }
        Ok(NodeOutcome::Advance {
            next: "retrieve".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

pub struct AuditRetrievalNode {
    retrieval: Arc<KnowledgeRetrieval>,
}

impl AuditRetrievalNode {
    pub fn new(retrieval: Arc<KnowledgeRetrieval>) -> Self {
        Self { retrieval }
    }
}

#[async_trait]
impl Node<AuditState> for AuditRetrievalNode {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn run(&self, mut state: AuditState) -> Result<NodeOutcome<AuditState>, NodeError> {
        let mut any_degraded = false;
        for scored in &mut state.candidates {
            let query = format!("{}: {}", scored.candidate.rule_id, scored.candidate.file_path);
            let result = self
                .retrieval
                .retrieve_knowledge(state.tenant, &query, &[scored.candidate.rule_id.clone()], Some(2))
                .await;
            any_degraded |= result.degraded;
            scored.retrieval_degraded = result.degraded;
            scored.cited_chunk_ids = result.chunks.iter().map(|c| c.id).collect();
        }
        state.degraded = any_degraded;
        Ok(NodeOutcome::Advance {
            next: "verdict".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

pub struct VerdictNode {
    config: AuditConfig,
}

impl VerdictNode {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Node<AuditState> for VerdictNode {
    fn name(&self) -> &'static str {
        "verdict"
    }

    async fn run(&self, mut state: AuditState) -> Result<NodeOutcome<AuditState>, NodeError> {
        for scored in &mut state.candidates {
            // A candidate whose own retrieval failed or timed out is a
            // different case from one that genuinely cited nothing: the
            // rule may still be correct, we just couldn't confirm it.
            // Degrade rather than dismiss, and never attach remediation
            // code to a finding we couldn't ground.
            if scored.retrieval_degraded {
                scored.candidate.verdict = Verdict::Downgrade;
                scored.candidate.verdict_severity = Severity::Warn;
                continue;
            }

            // A candidate with no supporting citation can't clear the
            // confidence bar, regardless of rule severity: the no-citation-
            // no-edit invariant means an uncited finding is downgraded
            // rather than accepted outright.
            let confidence = if scored.cited_chunk_ids.is_empty() {
                0.0
            } else {
                match scored.candidate.rule_severity {
                    RuleSeverity::High => 0.95,
                    RuleSeverity::Medium => 0.80,
                    RuleSeverity::Low => 0.55,
                }
            };

            scored.candidate.verdict = if confidence >= self.config.verdict_confidence_threshold {
                scored.candidate.verdict_severity = match scored.candidate.rule_severity {
                    RuleSeverity::High => Severity::Critical,
                    RuleSeverity::Medium => Severity::Error,
                    RuleSeverity::Low => Severity::Warn,
                };
                Verdict::Accept
            } else if confidence > 0.0 {
                scored.candidate.verdict_severity = Severity::Warn;
                Verdict::Downgrade
            } else {
                scored.candidate.verdict_severity = Severity::Info;
                Verdict::DismissAsFalsePositive
            };
        }

        Ok(NodeOutcome::Advance {
            next: "remediate".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Remediation Composer
// ---------------------------------------------------------------------------

pub struct RemediationComposerNode {
    llm: Arc<dyn LlmProvider>,
    synthesis: SynthesisConfig,
}

impl RemediationComposerNode {
    pub fn new(llm: Arc<dyn LlmProvider>, synthesis: SynthesisConfig) -> Self {
        Self { llm, synthesis }
    }
}

fn bounded_remediation_prompt(rule_id: &str, file_path: &str, max_prompt_chars: usize) -> String {
    let prompt = format!(
        "A static check flagged rule `{rule_id}` in `{file_path}`. Using only the reference material below, write a short Rust code comment suggesting the fix. Do not invent facts not present in the material.\n\nReference material:\n"
    );
    prompt.chars().take(max_prompt_chars).collect()
}

#[async_trait]
impl Node<AuditState> for RemediationComposerNode {
    fn name(&self) -> &'static str {
        "remediate"
    }

    async fn run(&self, mut state: AuditState) -> Result<NodeOutcome<AuditState>, NodeError> {
        for scored in &mut state.candidates {
            if scored.candidate.verdict != Verdict::Accept {
                continue;
            }
            // No-citation-no-edit: a remediation snippet is only composed
            // when a cited chunk exists to anchor it.
            if scored.cited_chunk_ids.first().is_none() {
                continue;
            }

            let prompt = bounded_remediation_prompt(
                &scored.candidate.rule_id,
                &scored.candidate.file_path,
                self.synthesis.max_prompt_chars,
            );
            let messages = vec![LlmMessage::user(prompt)];
            let config = LlmConfig {
                model: self.synthesis.model.clone(),
                max_tokens: self.synthesis.max_tokens,
                temperature: self.synthesis.temperature,
                system_prompt: Some(
                    "You are Aura, reviewing a code diff. Respond with a single Rust comment block, nothing else.".to_string(),
                ),
            };
            scored.remediation_code = match self.llm.complete(&messages, &config).await {
                Ok(response) => Some(response.content),
                Err(e) => {
                    warn!(error = %e, rule_id = %scored.candidate.rule_id, "remediation synthesis call failed; leaving remediation unset");
                    state.degraded = true;
                    None
                }
            };
        }

        state
            .candidates
            .sort_by(|a, b| {
                b.candidate
                    .verdict_severity
                    .cmp(&a.candidate.verdict_severity)
                    .then_with(|| a.candidate.file_path.cmp(&b.candidate.file_path))
                    .then_with(|| a.candidate.line.cmp(&b.candidate.line))
            });

        Ok(NodeOutcome::Advance {
            next: "terminal".to_string(),
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

pub struct AuditTerminalNode;

#[async_trait]
impl Node<AuditState> for AuditTerminalNode {
    fn name(&self) -> &'static str {
        "terminal"
    }

    async fn run(&self, state: AuditState) -> Result<NodeOutcome<AuditState>, NodeError> {
        let mut cited_chunk_ids = Vec::new();
        let mut remediation_snippets = Vec::new();
        let mut candidates = Vec::new();

        for scored in state.candidates {
            for &id in &scored.cited_chunk_ids {
                if !cited_chunk_ids.contains(&id) {
                    cited_chunk_ids.push(id);
                }
            }
            if let (Some(code), Some(&chunk_id)) =
                (scored.remediation_code.clone(), scored.cited_chunk_ids.first())
            {
                remediation_snippets.push(RemediationSnippet {
                    code,
                    cited_chunk_id: chunk_id,
                });
            }
            candidates.push(scored.candidate);
        }

        let overall_severity = candidates
            .iter()
            .map(|c| c.verdict_severity)
            .max()
            .unwrap_or(Severity::Info);

        let body = if candidates.is_empty() {
            "No violations survived review.".to_string()
        } else {
            format!("{} candidate(s) flagged for review.", candidates.len())
        };

        let intervention = Intervention {
            fingerprint: String::new(),
            kind: InterventionKind::ViolationReport,
            severity: overall_severity,
            body,
            cited_chunk_ids,
            remediation_snippets,
            produced_at: Utc::now(),
            degraded: state.degraded,
            violation_candidates: candidates,
        };

        Ok(NodeOutcome::Terminal(Some(intervention)))
    }
}

pub fn build_audit_graph(
    config: AuditConfig,
    retrieval: Arc<KnowledgeRetrieval>,
    llm: Arc<dyn LlmProvider>,
    synthesis: SynthesisConfig,
) -> crate::graph::GraphSpec<AuditState> {
    crate::graph::GraphSpec::new(
        "parse",
        vec![
            Arc::new(DiffParserNode::new(config.max_diff_bytes)),
            Arc::new(RulePrefilterNode),
            Arc::new(AuditRetrievalNode::new(retrieval)),
            Arc::new(VerdictNode::new(config)),
            Arc::new(RemediationComposerNode::new(llm, synthesis)),
            Arc::new(AuditTerminalNode),
        ],
    )
}
