//! Error-kind taxonomy shared by every crate in the workspace.
//!
//! Nodes and components tag errors with one of these kinds rather than
//! relying on exceptions or ad-hoc string matching; the Workflow Runtime
//! switches on the kind to decide retry vs. fail vs. degrade.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input; terminal; surfaced with a specific reason.
    Validation,
    /// Session invalid/expired; terminal; surfaces `unauthenticated`.
    Authz,
    /// Rate limit exceeded; terminal; surfaces `rate_limited` with a retry-after hint.
    Quota,
    /// Backend hiccup (store, embedding, LLM); retried per node policy.
    Transient,
    /// Retrieval returned nothing or timed out; pipeline proceeds with reduced confidence.
    Degraded,
    /// Deadline or explicit cancellation; terminal.
    Cancelled,
    /// Programming error or unreachable branch; terminal; logged with a diagnostic id.
    Internal,
}

impl ErrorKind {
    /// Whether the Workflow Runtime should retry a node that failed with
    /// this kind (subject to the node's own `max_attempts`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Whether this kind is terminal — i.e. it ends the Job rather than
    /// degrading or retrying.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ErrorKind::Transient | ErrorKind::Degraded)
    }
}

/// Top-level error type for library code that doesn't define its own
/// crate-specific enum. Crate-specific error enums (e.g. `StoreError`,
/// `WorkflowError`) implement `kind()` with the same signature and convert
/// into this type at crate boundaries via `#[from]`.
#[derive(Debug, thiserror::Error)]
pub enum AuraError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthenticated")]
    Authz,

    #[error("rate_limited: retry after {retry_after_secs}s")]
    Quota { retry_after_secs: u64 },

    #[error("transient: {0}")]
    Transient(String),

    #[error("degraded: {0}")]
    Degraded(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error (diagnostic id {diagnostic_id})")]
    Internal { diagnostic_id: Uuid, source: String },
}

impl AuraError {
    pub fn internal(source: impl Into<String>) -> Self {
        let diagnostic_id = Uuid::new_v4();
        let source = source.into();
        tracing::error!(%diagnostic_id, %source, "internal error");
        AuraError::Internal {
            diagnostic_id,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuraError::Validation(_) => ErrorKind::Validation,
            AuraError::Authz => ErrorKind::Authz,
            AuraError::Quota { .. } => ErrorKind::Quota,
            AuraError::Transient(_) => ErrorKind::Transient,
            AuraError::Degraded(_) => ErrorKind::Degraded,
            AuraError::Cancelled => ErrorKind::Cancelled,
            AuraError::Internal { .. } => ErrorKind::Internal,
        }
    }
}
