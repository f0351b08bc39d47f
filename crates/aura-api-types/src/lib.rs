//! Wire types for the orchestrator's RPC surface: `submitEdits`,
//! `submitAudit`, `fetchLesson`, `refreshSession`, plus the error envelope
//! and CLI exit-code mapping shared by every transport that fronts the
//! core (HTTP+JSON today; the core itself is transport-agnostic).

use aura_core::error::ErrorKind;
use aura_core::types::{Intervention, JobState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// POST /sessions/refresh
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSessionRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

// ---------------------------------------------------------------------------
// POST /telemetry (submitEdits)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEventPayload {
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEditsRequest {
    pub session: Uuid,
    pub events: Vec<TelemetryEventPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEditsResponse {
    pub fingerprint: String,
    pub coalesced: bool,
}

// ---------------------------------------------------------------------------
// POST /audit (submitAudit)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAuditRequest {
    pub tenant: Uuid,
    pub diff: String,
    pub base_hash: String,
    pub new_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAuditResponse {
    pub fingerprint: String,
    pub coalesced: bool,
}

// ---------------------------------------------------------------------------
// GET /interventions/{fingerprint} (fetchLesson, and audit polling)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchInterventionResponse {
    Terminal { intervention: Box<Intervention> },
    Pending { state: JobState },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchLessonRequest {
    pub tenant: Uuid,
    pub session: Uuid,
    pub error_type: String,
    pub code_context: String,
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after_secs: Option<u64>,
    /// Present only for `ErrorKind::Internal`; opaque token the operator
    /// correlates with logs.
    pub diagnostic_id: Option<Uuid>,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_secs: None,
            diagnostic_id: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn with_diagnostic_id(mut self, id: Uuid) -> Self {
        self.diagnostic_id = Some(id);
        self
    }
}

// ---------------------------------------------------------------------------
// CLI exit codes
// ---------------------------------------------------------------------------

/// Exit codes for any CLI wrapper of the core (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliExitCode {
    Success = 0,
    OtherFailure = 1,
    Denied = 2,
    Degraded = 3,
    Cancelled = 4,
}

impl CliExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a terminal outcome's error kind to the exit code a CLI wrapper
    /// should return; `Transient`/`Degraded` never reach here as a failing
    /// kind outright (Degraded intervenes are still a success with a flag).
    pub fn from_error_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Authz | ErrorKind::Quota => CliExitCode::Denied,
            ErrorKind::Degraded => CliExitCode::Degraded,
            ErrorKind::Cancelled => CliExitCode::Cancelled,
            ErrorKind::Validation | ErrorKind::Transient | ErrorKind::Internal => {
                CliExitCode::OtherFailure
            }
        }
    }
}
