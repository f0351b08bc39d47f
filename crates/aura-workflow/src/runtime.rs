//! The Workflow Runtime: receives admitted `Job`s from the Gatekeeper,
//! dispatches each to the pipeline its `JobKind` names, and bounds
//! concurrency per-tenant and globally (spec §4.2).
//!
//! Jobs arrive over an in-process channel rather than a direct call so the
//! `JobSink::enqueue` caller (the Gatekeeper's HTTP handler) never blocks on
//! a worker being free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aura_core::config::{AuditConfig, GatekeeperConfig, StruggleConfig, SynthesisConfig, WorkflowConfig};
use aura_core::types::{DiffArtifact, Job, JobKind, JobState, TelemetryWindow, UserLevel};
use aura_gatekeeper::admission::JobSink;
use aura_harness::retry::RetryPolicy;
use aura_retrieval::{KnowledgeRetrieval, LlmProvider};
use aura_store::backend::StoreBackend;
use aura_store::result_store::ResultStore;
use aura_store::subscription_bus::SubscriptionBus;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit_pipeline::{build_audit_graph, AuditState};
use crate::graph::{run_graph, CancellationFlag, CheckpointStore};
use crate::struggle_pipeline::{build_struggle_graph, CooldownGate, StoreCooldownGate, StruggleState};

/// Per-Job input the runtime needs beyond what's carried in `Job` itself:
/// the Gatekeeper stores the normalized payload by reference, so the caller
/// wiring a Job onto the runtime must also hand over the material the
/// relevant pipeline needs to build its initial state.
pub enum JobInput {
    Struggle {
        window: TelemetryWindow,
        user_level: UserLevel,
    },
    Audit {
        artifact: DiffArtifact,
    },
}

pub struct WorkflowRuntime {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    workflow_config: WorkflowConfig,
    struggle_config: StruggleConfig,
    audit_config: AuditConfig,
    retrieval: Arc<KnowledgeRetrieval>,
    llm: Arc<dyn LlmProvider>,
    synthesis: SynthesisConfig,
    results: ResultStore,
    bus: Arc<SubscriptionBus>,
    global_inflight: Arc<Semaphore>,
    tenant_inflight: DashMap<Uuid, Arc<Semaphore>>,
    max_inflight_per_tenant: u32,
    cancellations: DashMap<String, CancellationFlag>,
    pending_inputs: DashMap<String, JobInput>,
    active_jobs: Arc<AtomicU32>,
}

impl WorkflowRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        key_prefix: &str,
        workflow_config: WorkflowConfig,
        struggle_config: StruggleConfig,
        audit_config: AuditConfig,
        gatekeeper_config: &GatekeeperConfig,
        retrieval: Arc<KnowledgeRetrieval>,
        llm: Arc<dyn LlmProvider>,
        synthesis: SynthesisConfig,
        result_ttl_seconds: u64,
        bus: Arc<SubscriptionBus>,
    ) -> Self {
        Self {
            results: ResultStore::new(backend.clone(), key_prefix, result_ttl_seconds),
            global_inflight: Arc::new(Semaphore::new(gatekeeper_config.max_inflight_global as usize)),
            max_inflight_per_tenant: gatekeeper_config.max_inflight_per_tenant,
            tenant_inflight: DashMap::new(),
            backend,
            key_prefix: key_prefix.to_string(),
            workflow_config,
            struggle_config,
            audit_config,
            retrieval,
            llm,
            synthesis,
            bus,
            cancellations: DashMap::new(),
            pending_inputs: DashMap::new(),
            active_jobs: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Registers the pipeline-specific input for a Job before it's handed
    /// to `enqueue`. The Gatekeeper's `Job` carries only an opaque
    /// `payload_ref`; the caller wiring the HTTP edge to the runtime is
    /// responsible for stashing the real payload here under the same
    /// fingerprint first.
    pub fn stage_input(&self, fingerprint: &str, input: JobInput) {
        self.pending_inputs.insert(fingerprint.to_string(), input);
    }

    pub fn cancel(&self, fingerprint: &str) {
        if let Some(flag) = self.cancellations.get(fingerprint) {
            flag.cancel();
        }
    }

    pub fn active_job_count(&self) -> u32 {
        self.active_jobs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSink for WorkflowRuntime {
    async fn enqueue(&self, job: Job) {
        // Jobs run to completion on a spawned task; the runtime's own
        // inflight semaphores (not a bounded channel) are what apply
        // backpressure, so enqueue itself never blocks the Gatekeeper.
        if job.state != JobState::Pending {
            warn!(fingerprint = %job.fingerprint, "refusing to enqueue a job not in Pending state");
            return;
        }
        let runtime = self.clone_for_spawn();
        tokio::spawn(async move { runtime.run_job(job).await });
    }
}

/// `WorkflowRuntime` is always held behind an `Arc` by its owner; this
/// clones the `Arc`'d fields it needs for a spawned task without requiring
/// callers to wrap every field individually.
impl WorkflowRuntime {
    fn clone_for_spawn(&self) -> Arc<SpawnHandle> {
        Arc::new(SpawnHandle {
            backend: self.backend.clone(),
            key_prefix: self.key_prefix.clone(),
            workflow_config: self.workflow_config.clone(),
            struggle_config: self.struggle_config.clone(),
            audit_config: self.audit_config.clone(),
            retrieval: self.retrieval.clone(),
            llm: self.llm.clone(),
            synthesis: self.synthesis.clone(),
            results: ResultStore::new(self.backend.clone(), &self.key_prefix, 0),
            bus: self.bus.clone(),
            global_inflight: self.global_inflight.clone(),
            tenant_inflight: self.tenant_inflight.clone(),
            max_inflight_per_tenant: self.max_inflight_per_tenant,
            cancellations: self.cancellations.clone(),
            pending_inputs: self.pending_inputs.clone(),
            active_jobs: self.active_jobs.clone(),
        })
    }
}

// `DashMap` clones are cheap Arc-backed handles, so the runtime can hand a
// lightweight clone into a spawned task instead of wrapping itself in an
// outer Arc at every call site. `SpawnHandle` mirrors `WorkflowRuntime`'s
// fields, plus its own `Arc<AtomicU32>` handle onto the same counter so
// `active_job_count()` reflects jobs actually in flight on spawned tasks.
struct SpawnHandle {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    workflow_config: WorkflowConfig,
    struggle_config: StruggleConfig,
    audit_config: AuditConfig,
    retrieval: Arc<KnowledgeRetrieval>,
    llm: Arc<dyn LlmProvider>,
    synthesis: SynthesisConfig,
    results: ResultStore,
    bus: Arc<SubscriptionBus>,
    global_inflight: Arc<Semaphore>,
    tenant_inflight: DashMap<Uuid, Arc<Semaphore>>,
    max_inflight_per_tenant: u32,
    cancellations: DashMap<String, CancellationFlag>,
    pending_inputs: DashMap<String, JobInput>,
    active_jobs: Arc<AtomicU32>,
}

impl SpawnHandle {
    async fn run_job(&self, job: Job) {
        let fingerprint = job.fingerprint.clone();
        let Some((_, input)) = self.pending_inputs.remove(&fingerprint) else {
            warn!(%fingerprint, "job enqueued with no staged input; dropping");
            return;
        };

        let global_permit = self.global_inflight.clone().acquire_owned().await;
        let tenant_semaphore = self
            .tenant_inflight
            .entry(job.tenant_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_inflight_per_tenant as usize)))
            .clone();
        let tenant_permit = tenant_semaphore.acquire_owned().await;
        let (Ok(_global_permit), Ok(_tenant_permit)) = (global_permit, tenant_permit) else {
            warn!(%fingerprint, "inflight semaphore closed; dropping job");
            return;
        };

        self.active_jobs.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationFlag::new();
        self.cancellations.insert(fingerprint.clone(), cancel.clone());

        let retry_policy = RetryPolicy::new(
            self.workflow_config.node_max_attempts,
            std::time::Duration::from_millis(self.workflow_config.retry_base_ms),
            std::time::Duration::from_secs(10),
        );

        let checkpoint_ttl = self.workflow_config.cancellation_grace_seconds * 120;
        let outcome = match (job.kind, input) {
            (JobKind::Struggle, JobInput::Struggle { window, user_level }) => {
                let tenant = window.session_id;
                let cooldown: Arc<dyn CooldownGate> =
                    Arc::new(StoreCooldownGate::new(self.backend.clone(), &self.key_prefix));
                let graph = build_struggle_graph(
                    self.struggle_config.clone(),
                    cooldown,
                    self.retrieval.clone(),
                    self.llm.clone(),
                    self.synthesis.clone(),
                );
                let checkpoints: CheckpointStore<StruggleState> =
                    CheckpointStore::new(self.backend.clone(), &self.key_prefix, checkpoint_ttl);
                let state = StruggleState::new(tenant, window, user_level);
                run_graph(&graph, &checkpoints, &fingerprint, state, retry_policy, &cancel)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(%fingerprint, error = %e, "struggle pipeline failed");
                        None
                    })
            }
            (JobKind::Audit, JobInput::Audit { artifact }) => {
                let graph = build_audit_graph(
                    self.audit_config.clone(),
                    self.retrieval.clone(),
                    self.llm.clone(),
                    self.synthesis.clone(),
                );
                let checkpoints: CheckpointStore<AuditState> =
                    CheckpointStore::new(self.backend.clone(), &self.key_prefix, checkpoint_ttl);
                let state = AuditState::new(job.tenant_id, artifact);
                run_graph(&graph, &checkpoints, &fingerprint, state, retry_policy, &cancel)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(%fingerprint, error = %e, "audit pipeline failed");
                        None
                    })
            }
            _ => {
                warn!(%fingerprint, "job kind and staged input disagree");
                None
            }
        };

        self.cancellations.remove(&fingerprint);
        self.active_jobs.fetch_sub(1, Ordering::SeqCst);

        if let Some(mut intervention) = outcome {
            intervention.fingerprint = fingerprint.clone();
            if let Err(e) = self.results.put(&fingerprint, &intervention).await {
                warn!(%fingerprint, error = %e, "failed to persist terminal result");
            }
            self.bus.publish(&fingerprint, intervention);
            info!(%fingerprint, "job completed");
        } else {
            info!(%fingerprint, "job completed with no intervention");
        }
    }
}
