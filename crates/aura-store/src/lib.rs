//! Session & Quota Store: Redis-backed session lifecycle, tenant/route
//! token-bucket quotas, fingerprint coalescence, and the terminal-result
//! cache + subscription bus that let coalesced callers share one answer.
//!
//! [`backend`] defines the storage abstraction (`StoreBackend`) with both
//! a production `RedisBackend` and an `InMemoryBackend` test double; every
//! other module here is backend-agnostic and built purely on that trait.

pub mod backend;
pub mod error;
pub mod inflight_registry;
pub mod quota_store;
pub mod result_store;
pub mod session_store;
pub mod subscription_bus;

pub use backend::{InMemoryBackend, RedisBackend, StoreBackend};
pub use error::StoreError;
pub use inflight_registry::{Claim, InflightRegistry};
pub use quota_store::{Admission, QuotaStore};
pub use result_store::ResultStore;
pub use session_store::{RefreshToken, SessionError, SessionStore};
pub use subscription_bus::SubscriptionBus;
