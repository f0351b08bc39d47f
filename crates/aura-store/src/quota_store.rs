//! Tenant/route token-bucket quota half of the Session & Quota Store:
//! `bucket:<tenant>:<route> -> {tokens, last_refill_at}`, refilled and
//! consumed atomically at the backend (spec §4.6). There is deliberately
//! no in-process mirror of bucket state: every admission check round-trips
//! to the backend so multi-process deployments never drift.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::backend::StoreBackend;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted,
    Denied { retry_after: Duration },
}

pub struct QuotaStore {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
}

impl QuotaStore {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: &str) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn key(&self, tenant_id: Uuid, route: &str) -> String {
        format!("{}:bucket:{tenant_id}:{route}", self.key_prefix)
    }

    /// Attempts to take one token from `(tenant_id, route)`'s bucket.
    /// `capacity` and `refill_rate` (tokens/sec) are resolved by the caller
    /// from the tenant's `QuotaProfile` or the configured defaults.
    pub async fn admit(
        &self,
        tenant_id: Uuid,
        route: &str,
        capacity: f64,
        refill_rate: f64,
    ) -> Result<Admission, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let outcome = self
            .backend
            .take_token(&self.key(tenant_id, route), capacity, refill_rate, now_ms)
            .await?;
        if outcome.admitted {
            Ok(Admission::Admitted)
        } else {
            // Conservative estimate: time to accumulate one full token.
            let secs_to_one_token = if refill_rate > 0.0 {
                1.0 / refill_rate
            } else {
                f64::INFINITY
            };
            Ok(Admission::Denied {
                retry_after: Duration::from_secs_f64(secs_to_one_token.min(3600.0)),
            })
        }
    }
}
