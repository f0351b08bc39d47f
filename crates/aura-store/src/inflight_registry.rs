//! At-most-one-running registry used by the Gatekeeper for fingerprint
//! coalescence (spec §4.1): a second request that hashes to a fingerprint
//! already in flight joins the first instead of starting a duplicate job.
//!
//! `try_claim` is the only mutating entry point and is atomic at the
//! backend (`set_if_absent`), so two concurrent claimants can never both
//! believe they started the job.

use std::sync::Arc;
use uuid::Uuid;

use crate::backend::StoreBackend;
use crate::error::StoreError;

pub struct InflightRegistry {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    claim_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Claim {
    /// This caller is now the owner of record for the fingerprint's job.
    Owner(Uuid),
    /// Another job already owns this fingerprint; join it instead.
    Joined(Uuid),
}

impl InflightRegistry {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: &str, claim_ttl_seconds: u64) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.to_string(),
            claim_ttl_seconds,
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}:inflight:{fingerprint}", self.key_prefix)
    }

    /// Attempts to claim `fingerprint` for a newly minted `job_id`. If
    /// another job already claimed it, returns the owning job's id instead.
    pub async fn try_claim(&self, fingerprint: &str, job_id: Uuid) -> Result<Claim, StoreError> {
        let key = self.key(fingerprint);
        let claimed = self
            .backend
            .set_if_absent(&key, job_id.to_string(), self.claim_ttl_seconds)
            .await?;
        if claimed {
            return Ok(Claim::Owner(job_id));
        }
        match self.backend.get(&key).await? {
            Some(owner) => {
                let owner_id = Uuid::parse_str(&owner).map_err(|_| StoreError::Serde(
                    "inflight registry held a non-uuid owner value".to_string(),
                ))?;
                Ok(Claim::Joined(owner_id))
            }
            // The owner's claim expired between our failed set and this get.
            None => Ok(Claim::Owner(job_id)),
        }
    }

    /// Releases a fingerprint's claim once the owning job has produced a
    /// terminal result (success, failure, or cancellation).
    pub async fn release(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.backend.del(&self.key(fingerprint)).await
    }
}
