//! Generic stateful graph executor (spec §4.2). Each `Job` kind supplies its
//! own statically declared graph — a map of named nodes plus an entry point
//! — and drives it through this single scheduler. The runtime treats node
//! state as opaque except for the checkpoint/step bookkeeping it needs for
//! crash recovery.
//!
//! Cancellation is cooperative: a node only observes it between steps, at
//! the point this executor is about to invoke the next node. A node that is
//! mid-flight on external I/O is allowed to finish; the grace period is
//! enforced by the caller wrapping `run_graph` in a timeout.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aura_core::error::ErrorKind;
use aura_core::types::Intervention;
use aura_harness::retry::{run_with_retry, RetryPolicy};
use aura_store::backend::StoreBackend;
use aura_store::error::StoreError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("node {node} failed: {message}")]
    NodeFailed { node: String, message: String },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NodeFailed { .. } => ErrorKind::Internal,
            WorkflowError::Cancelled => ErrorKind::Cancelled,
            WorkflowError::Store(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NodeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub enum NodeOutcome<S> {
    /// Continue to the named next node with the given (possibly mutated)
    /// state.
    Advance { next: String, state: S },
    /// The graph has reached a terminal decision. `None` means the graph
    /// decided no Intervention is warranted (e.g. the Struggle Detector's
    /// threshold didn't fire).
    Terminal(Option<Intervention>),
}

#[async_trait]
pub trait Node<S>: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, state: S) -> Result<NodeOutcome<S>, NodeError>;
}

pub struct GraphSpec<S> {
    pub entry: &'static str,
    pub nodes: HashMap<&'static str, Arc<dyn Node<S>>>,
}

impl<S> GraphSpec<S> {
    pub fn new(entry: &'static str, nodes: Vec<Arc<dyn Node<S>>>) -> Self {
        let nodes = nodes.into_iter().map(|n| (n.name(), n)).collect();
        Self { entry, nodes }
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct Checkpoint<S> {
    step: u64,
    node: String,
    state: S,
}

/// Persists pre-node state under `checkpoint:<fingerprint>` so a crashed job
/// resumes at the node that was in flight (spec §4.2 checkpointing
/// invariant).
pub struct CheckpointStore<S> {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    ttl_seconds: u64,
    _marker: PhantomData<S>,
}

impl<S> CheckpointStore<S>
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: &str, ttl_seconds: u64) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.to_string(),
            ttl_seconds,
            _marker: PhantomData,
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}:checkpoint:{fingerprint}", self.key_prefix)
    }

    async fn save(&self, fingerprint: &str, step: u64, node: &str, state: &S) -> Result<(), StoreError>
    where
        S: Clone,
    {
        let checkpoint = Checkpoint {
            step,
            node: node.to_string(),
            state: state.clone(),
        };
        let raw = serde_json::to_string(&checkpoint)?;
        self.backend.set_ex(&self.key(fingerprint), raw, self.ttl_seconds).await
    }

    pub async fn load(&self, fingerprint: &str) -> Result<Option<(u64, String, S)>, StoreError> {
        match self.backend.get(&self.key(fingerprint)).await? {
            Some(raw) => {
                let checkpoint: Checkpoint<S> = serde_json::from_str(&raw)?;
                Ok(Some((checkpoint.step, checkpoint.node, checkpoint.state)))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.backend.del(&self.key(fingerprint)).await
    }
}

#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives `spec` to completion (or cancellation), checkpointing before each
/// node transition and retrying retryable node failures per `retry_policy`.
/// Resumes from `checkpoints` if a prior run left a checkpoint for
/// `fingerprint`; otherwise starts at `spec.entry` with `initial_state`.
pub async fn run_graph<S>(
    spec: &GraphSpec<S>,
    checkpoints: &CheckpointStore<S>,
    fingerprint: &str,
    initial_state: S,
    retry_policy: RetryPolicy,
    cancel: &CancellationFlag,
) -> Result<Option<Intervention>, WorkflowError>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    let (mut step, mut node_name, mut state) = match checkpoints.load(fingerprint).await? {
        Some((step, node, state)) => (step, node, state),
        None => (0u64, spec.entry.to_string(), initial_state),
    };

    loop {
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        checkpoints.save(fingerprint, step, &node_name, &state).await?;

        let node = spec
            .nodes
            .get(node_name.as_str())
            .cloned()
            .ok_or_else(|| WorkflowError::NodeFailed {
                node: node_name.clone(),
                message: "unknown node".to_string(),
            })?;

        let outcome = run_with_retry(
            &retry_policy,
            |e: &NodeError| e.kind,
            || {
                let node = node.clone();
                let state = state.clone();
                async move { node.run(state).await }
            },
        )
        .await
        .map_err(|e| WorkflowError::NodeFailed {
            node: node_name.clone(),
            message: e.message,
        })?;

        match outcome {
            NodeOutcome::Advance { next, state: new_state } => {
                state = new_state;
                node_name = next;
                step += 1;
            }
            NodeOutcome::Terminal(intervention) => {
                checkpoints.clear(fingerprint).await?;
                return Ok(intervention);
            }
        }
    }
}
