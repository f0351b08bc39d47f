//! Fingerprint-keyed store of terminal `Intervention` results (spec §4.1,
//! §4.6). A coalesced request that joins an in-flight job subscribes on the
//! [`subscription_bus`](crate::subscription_bus); a request that arrives
//! after the job has already completed reads the cached terminal result
//! here instead of re-running the pipeline.

use aura_core::types::Intervention;
use std::sync::Arc;

use crate::backend::StoreBackend;
use crate::error::StoreError;

pub struct ResultStore {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    result_ttl_seconds: u64,
}

impl ResultStore {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: &str, result_ttl_seconds: u64) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.to_string(),
            result_ttl_seconds,
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}:result:{fingerprint}", self.key_prefix)
    }

    pub async fn put(&self, fingerprint: &str, intervention: &Intervention) -> Result<(), StoreError> {
        let raw = serde_json::to_string(intervention)?;
        self.backend
            .set_ex(&self.key(fingerprint), raw, self.result_ttl_seconds)
            .await
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<Intervention>, StoreError> {
        match self.backend.get(&self.key(fingerprint)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use aura_core::types::InterventionKind;
    use chrono::Utc;

    fn sample() -> Intervention {
        Intervention {
            fingerprint: "fp1".to_string(),
            kind: InterventionKind::Lesson,
            severity: aura_core::types::Severity::Info,
            body: "keep going".to_string(),
            cited_chunk_ids: vec![],
            remediation_snippets: vec![],
            produced_at: Utc::now(),
            degraded: false,
            violation_candidates: vec![],
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = ResultStore::new(Arc::new(InMemoryBackend::new()), "test", 3600);
        let intervention = sample();
        store.put("fp1", &intervention).await.unwrap();
        let fetched = store.get("fp1").await.unwrap().unwrap();
        assert_eq!(fetched.fingerprint, "fp1");
        assert_eq!(fetched.body, "keep going");
    }

    #[tokio::test]
    async fn missing_fingerprint_returns_none() {
        let store = ResultStore::new(Arc::new(InMemoryBackend::new()), "test", 3600);
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
