//! Domain types shared across the Intervention Orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Tenant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub quota_profile: QuotaProfile,
    /// Handle into the Knowledge Index's per-tenant namespace.
    pub knowledge_index_handle: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaProfile {
    pub bucket_capacity: u32,
    pub bucket_refill_rate: f64,
    pub max_inflight: u32,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// SHA-256 hash of the current refresh token; never the raw token.
    pub refresh_token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_level: UserLevel,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl Default for UserLevel {
    fn default() -> Self {
        UserLevel::Intermediate
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One admitted operation, mutated only by the Workflow Runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub fingerprint: String,
    pub tenant_id: Uuid,
    pub kind: JobKind,
    /// Opaque reference to the payload (e.g. a `DiffArtifact` id or a
    /// `TelemetryWindow` session id); the runtime never inspects it.
    pub payload_ref: String,
    pub submitted_at: DateTime<Utc>,
    pub state: JobState,
    pub attempts: u32,
    /// Serialized pre-node state captured before the last external I/O.
    pub checkpoint: Option<serde_json::Value>,
    /// Monotonic step counter, advanced once per node transition.
    pub step: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Struggle,
    Audit,
    Lesson,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// `true` once a Job can no longer be mutated.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Mirrors the exhaustive state-transition tables elsewhere in this
    /// workspace: a Job's state graph is small and fully enumerable.
    pub fn can_transition_to(&self, target: &JobState) -> bool {
        matches!(
            (self, target),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Running)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

// ---------------------------------------------------------------------------
// TelemetryWindow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Timestamp as reported by the client; informational only.
    pub client_ts: DateTime<Utc>,
    /// Timestamp at which the server received the event; used for ordering.
    pub received_ts: DateTime<Utc>,
    pub kind: TelemetryEventKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEventKind {
    Edit,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryWindow {
    pub session_id: Uuid,
    /// Events within the last `W` seconds, in receive order.
    pub events: Vec<TelemetryEvent>,
    pub dropped_out_of_order: u64,
}

impl TelemetryWindow {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            events: Vec::new(),
            dropped_out_of_order: 0,
        }
    }

    /// Appends `event` if it is not older (by receive time) than the most
    /// recent event already in the window; otherwise it is dropped and the
    /// drop counter incremented. Events are never reordered.
    pub fn push(&mut self, event: TelemetryEvent) {
        if let Some(last) = self.events.last() {
            if event.received_ts < last.received_ts {
                self.dropped_out_of_order += 1;
                return;
            }
        }
        self.events.push(event);
    }

    /// Evicts events older than `window_seconds` relative to `now`.
    pub fn evict_older_than(&mut self, now: DateTime<Utc>, window_seconds: i64) {
        let cutoff = now - chrono::Duration::seconds(window_seconds);
        self.events.retain(|e| e.received_ts >= cutoff);
    }

    pub fn edit_frequency(&self) -> u64 {
        self.events
            .iter()
            .filter(|e| e.kind == TelemetryEventKind::Edit)
            .count() as u64
    }

    pub fn distinct_error_signatures(&self) -> Vec<String> {
        let mut sigs: Vec<String> = self
            .events
            .iter()
            .filter(|e| e.kind == TelemetryEventKind::Error)
            .filter_map(|e| e.payload.get("signature").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect();
        sigs.sort();
        sigs.dedup();
        sigs
    }

    /// The signature of the error event with the latest `received_ts` in
    /// the window. `events` is receive-ordered and never reordered (see
    /// `push`), so the last matching event is the most recent one.
    pub fn most_recent_error_signature(&self) -> Option<String> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.kind == TelemetryEventKind::Error)
            .find_map(|e| e.payload.get("signature").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
    }

    pub fn duration_seconds(&self) -> i64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => {
                (last.received_ts - first.received_ts).num_seconds().max(0)
            }
            _ => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// DiffArtifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffArtifact {
    pub tenant_id: Uuid,
    pub file_path: String,
    pub base_hash: String,
    pub new_hash: String,
    pub unified_diff: String,
    pub sanitized: bool,
}

// ---------------------------------------------------------------------------
// KnowledgeChunk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: Uuid,
    /// `None` represents the global (cross-tenant) index.
    pub tenant_id: Option<Uuid>,
    pub source_path: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub tags: Vec<String>,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

// ---------------------------------------------------------------------------
// Intervention
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub fingerprint: String,
    pub kind: InterventionKind,
    pub severity: Severity,
    pub body: String,
    pub cited_chunk_ids: Vec<Uuid>,
    pub remediation_snippets: Vec<RemediationSnippet>,
    pub produced_at: DateTime<Utc>,
    /// Set when the producing pipeline fell back due to degraded retrieval.
    pub degraded: bool,
    pub violation_candidates: Vec<ViolationCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    Lesson,
    ViolationReport,
}

/// Post-verdict severity of an Intervention as a whole. Kept distinct from
/// [`RuleSeverity`] (§9 open question: the source conflated the two; this
/// workspace treats them as separate fields — see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationSnippet {
    pub code: String,
    /// No-citation-no-edit invariant: must reference an id present in
    /// `Intervention::cited_chunk_ids`.
    pub cited_chunk_id: Uuid,
}

/// A single flagged violation within a `violation_report` Intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationCandidate {
    pub rule_id: String,
    pub file_path: String,
    pub line: u32,
    pub rule_severity: RuleSeverity,
    pub verdict_severity: Severity,
    pub verdict: Verdict,
}

/// Severity assigned by the deterministic Rule Prefilter, before retrieval
/// and verdict adjustment. Distinct from [`Severity`] by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Downgrade,
    DismissAsFalsePositive,
}

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub last_refill_at: DateTime<Utc>,
}
