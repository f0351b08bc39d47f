//! Reliability primitives shared by every crate that talks to an external
//! system (Redis, the embedding/LLM providers, the knowledge index).
//!
//! - [`circuit_breaker`] — trips after consecutive failures, short-circuits
//!   calls while open, probes recovery in half-open.
//! - [`rate_limiter`] — in-process token buckets for edge-layer throttling
//!   (NOT the tenant/route quota of record — that lives in `aura-store`,
//!   Redis-backed, per the no-in-process-quota-mirror rule).
//! - [`retry`] — the Workflow Runtime's node-level retry/backoff policy,
//!   reusable anywhere a retryable-vs-terminal error kind needs bounded
//!   jittered backoff.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
