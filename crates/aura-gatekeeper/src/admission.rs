//! The Gatekeeper: the only path by which a client request becomes a `Job`
//! (spec §4.1). `admit` fingerprints the request, checks the Result Store
//! and in-flight registry for a duplicate, then spends a token from the
//! tenant/route bucket before minting a new `Job` and handing it to
//! whatever enqueues work onto the Workflow Runtime.

use std::sync::Arc;
use std::time::Duration;

use aura_core::error::ErrorKind;
use aura_core::types::{Job, JobKind, JobState};
use aura_store::backend::StoreBackend;
use aura_store::inflight_registry::{Claim, InflightRegistry};
use aura_store::quota_store::{Admission as QuotaAdmission, QuotaStore};
use aura_store::result_store::ResultStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatekeeperError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("quota_exhausted: retry after {retry_after:?}")]
    QuotaExhausted { retry_after: Duration },
    #[error("payload_rejected: {0}")]
    PayloadRejected(String),
    #[error("backend_unavailable: {0}")]
    BackendUnavailable(String),
}

impl GatekeeperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatekeeperError::Unauthenticated => ErrorKind::Authz,
            GatekeeperError::QuotaExhausted { .. } => ErrorKind::Quota,
            GatekeeperError::PayloadRejected(_) => ErrorKind::Validation,
            GatekeeperError::BackendUnavailable(_) => ErrorKind::Transient,
        }
    }
}

impl From<aura_store::error::StoreError> for GatekeeperError {
    fn from(e: aura_store::error::StoreError) -> Self {
        GatekeeperError::BackendUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum Admission {
    New,
    Coalesced,
    Denied { reason: String },
}

/// Receives newly admitted jobs. Implemented by whatever owns the Workflow
/// Runtime's enqueue path; the Gatekeeper has no knowledge of scheduling.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn enqueue(&self, job: Job);
}

pub struct RouteQuota {
    pub capacity: f64,
    pub refill_rate: f64,
}

pub struct Gatekeeper {
    backend: Arc<dyn StoreBackend>,
    quota: QuotaStore,
    inflight: InflightRegistry,
    results: ResultStore,
    sink: Arc<dyn JobSink>,
    coalescence_ttl_seconds: i64,
}

impl Gatekeeper {
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        key_prefix: &str,
        claim_ttl_seconds: u64,
        result_ttl_seconds: u64,
        coalescence_ttl_seconds: i64,
        sink: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            backend: backend.clone(),
            quota: QuotaStore::new(backend.clone(), key_prefix),
            inflight: InflightRegistry::new(backend.clone(), key_prefix, claim_ttl_seconds),
            results: ResultStore::new(backend, key_prefix, result_ttl_seconds),
            sink,
            coalescence_ttl_seconds,
        }
    }

    /// `admit(tenant, kind, payload) -> (fingerprint, admission)`.
    pub async fn admit(
        &self,
        tenant: Uuid,
        kind: JobKind,
        raw_payload: &str,
        idempotency_key: Option<&str>,
        route: &str,
        quota: RouteQuota,
    ) -> Result<(String, Admission), GatekeeperError> {
        let normalized = normalize(kind, raw_payload)?;
        let fingerprint = fingerprint_for(tenant, kind, &normalized, idempotency_key);

        if let Some(intervention) = self.results.get(&fingerprint).await? {
            let age = Utc::now().signed_duration_since(intervention.produced_at);
            if age.num_seconds() <= self.coalescence_ttl_seconds {
                return Ok((fingerprint, Admission::Coalesced));
            }
        }

        let claim_id = Uuid::new_v4();
        if let Claim::Joined(_) = self.inflight.try_claim(&fingerprint, claim_id).await? {
            return Ok((fingerprint, Admission::Coalesced));
        }

        match self
            .quota
            .admit(tenant, route, quota.capacity, quota.refill_rate)
            .await?
        {
            QuotaAdmission::Denied { retry_after } => {
                self.inflight.release(&fingerprint).await.ok();
                return Err(GatekeeperError::QuotaExhausted { retry_after });
            }
            QuotaAdmission::Admitted => {}
        }

        let job = Job {
            fingerprint: fingerprint.clone(),
            tenant_id: tenant,
            kind,
            payload_ref: normalized,
            submitted_at: Utc::now(),
            state: JobState::Pending,
            attempts: 0,
            checkpoint: None,
            step: 0,
        };
        self.sink.enqueue(job).await;
        Ok((fingerprint, Admission::New))
    }
}

fn fingerprint_for(tenant: Uuid, kind: JobKind, normalized_payload: &str, idempotency_key: Option<&str>) -> String {
    let kind_str = match kind {
        JobKind::Struggle => "struggle",
        JobKind::Audit => "audit",
        JobKind::Lesson => "lesson",
        JobKind::Refresh => "refresh",
    };
    let mut parts = vec![tenant.to_string(), kind_str.to_string(), normalized_payload.to_string()];
    if let Some(key) = idempotency_key {
        parts.push(key.to_string());
    }
    let refs: Vec<&str> = parts.iter().map(|s| s.as_str()).collect();
    aura_core::crypto::fingerprint(&refs)
}

fn normalize(kind: JobKind, raw: &str) -> Result<String, GatekeeperError> {
    match kind {
        JobKind::Audit => Ok(canonicalize_diff(raw)),
        JobKind::Struggle => canonicalize_window(raw),
        JobKind::Lesson | JobKind::Refresh => Ok(raw.trim().to_string()),
    }
}

fn canonicalize_diff(diff: &str) -> String {
    diff.replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Struggle payloads are `"<start_rfc3339>,<end_rfc3339>"`; boundaries are
/// rounded down to a 60s granularity so windows straddling a boundary by a
/// few milliseconds still fingerprint identically.
fn canonicalize_window(raw: &str) -> Result<String, GatekeeperError> {
    const GRANULARITY_SECONDS: i64 = 60;
    let (start, end) = raw
        .split_once(',')
        .ok_or_else(|| GatekeeperError::PayloadRejected("malformed window boundaries".to_string()))?;
    let round = |s: &str| -> Result<DateTime<Utc>, GatekeeperError> {
        let dt = DateTime::parse_from_rfc3339(s.trim())
            .map_err(|e| GatekeeperError::PayloadRejected(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let secs = dt.timestamp();
        let rounded = secs - secs.rem_euclid(GRANULARITY_SECONDS);
        Ok(DateTime::from_timestamp(rounded, 0).unwrap_or(dt))
    };
    let start = round(start)?;
    let end = round(end)?;
    Ok(format!("{},{}", start.to_rfc3339(), end.to_rfc3339()))
}
