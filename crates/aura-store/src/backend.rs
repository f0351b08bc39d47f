//! [`StoreBackend`] abstracts the Session & Quota Store's actual key-value
//! substrate so the rest of the crate (and its callers) can be exercised
//! against an in-memory double without a live Redis instance, while the
//! production path talks to Redis through a `ConnectionManager`.
//!
//! Every mutating operation here must be atomic at the backend: single
//! round-trip compare-and-set for Redis (via a `redis::Script`), single
//! `DashMap` shard-lock critical section for the in-memory double.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;

use crate::error::StoreError;

/// Outcome of an atomic token-bucket admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketOutcome {
    pub admitted: bool,
    pub tokens_remaining: f64,
}

/// Outcome of an atomic refresh-token rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented hash matched; `new_value` was stored in its place.
    Rotated,
    /// The presented hash did not match the stored value (replay, or the
    /// session never existed). The caller must fail-closed.
    Mismatch,
}

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Returns `true` if `key` was created (did not already exist), setting
    /// it to `value` with `ttl_secs`. Used for the in-flight registry's
    /// at-most-one-running invariant (`SET key value NX EX ttl`).
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl_secs: u64,
    ) -> Result<bool, StoreError>;

    /// Atomically applies the token-bucket refill/consume math described in
    /// spec §4.6: `tokens = min(capacity, stored + (now - last) * rate)`,
    /// deny if `< 1`, else consume one and persist `(tokens, now)`.
    async fn take_token(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now_unix_ms: i64,
    ) -> Result<TokenBucketOutcome, StoreError>;

    /// Atomically verifies `presented_hash` against the value stored at
    /// `key`; on match, replaces it with `new_value` (and sets `ttl_secs`).
    /// On mismatch, nothing is written — the caller is responsible for the
    /// fail-closed invalidation described in spec §4.6 step 3.
    async fn compare_and_rotate(
        &self,
        key: &str,
        presented_hash: &str,
        new_value: String,
        ttl_secs: u64,
    ) -> Result<RotateOutcome, StoreError>;
}

// ---------------------------------------------------------------------------
// Redis-backed implementation
// ---------------------------------------------------------------------------

pub struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

const TAKE_TOKEN_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local raw = redis.call('GET', key)
local tokens = capacity
local last_ms = now_ms
if raw then
  local sep = string.find(raw, ':')
  tokens = tonumber(string.sub(raw, 1, sep - 1))
  last_ms = tonumber(string.sub(raw, sep + 1))
end

local elapsed_s = (now_ms - last_ms) / 1000.0
if elapsed_s < 0 then elapsed_s = 0 end
tokens = math.min(capacity, tokens + elapsed_s * refill_rate)

local admitted = 0
if tokens >= 1 then
  tokens = tokens - 1
  admitted = 1
end

redis.call('SET', key, tostring(tokens) .. ':' .. tostring(now_ms), 'EX', ttl)
return {admitted, tostring(tokens)}
"#;

const COMPARE_AND_ROTATE_SCRIPT: &str = r#"
local key = KEYS[1]
local presented = ARGV[1]
local new_value = ARGV[2]
local ttl = tonumber(ARGV[3])

local current = redis.call('GET', key)
if current == presented then
  redis.call('SET', key, new_value, 'EX', ttl)
  return 1
else
  return 0
end
"#;

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let v: Option<String> = conn.get(key).await?;
        Ok(v)
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl_secs));
        let result: Option<String> = conn.set_options(key, value, opts).await?;
        Ok(result.is_some())
    }

    async fn take_token(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now_unix_ms: i64,
    ) -> Result<TokenBucketOutcome, StoreError> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(TAKE_TOKEN_SCRIPT);
        let (admitted, tokens_str): (i64, String) = script
            .key(key)
            .arg(capacity)
            .arg(refill_rate)
            .arg(now_unix_ms)
            .arg(3600i64)
            .invoke_async(&mut conn)
            .await?;
        Ok(TokenBucketOutcome {
            admitted: admitted == 1,
            tokens_remaining: tokens_str.parse().unwrap_or(0.0),
        })
    }

    async fn compare_and_rotate(
        &self,
        key: &str,
        presented_hash: &str,
        new_value: String,
        ttl_secs: u64,
    ) -> Result<RotateOutcome, StoreError> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(COMPARE_AND_ROTATE_SCRIPT);
        let ok: i64 = script
            .key(key)
            .arg(presented_hash)
            .arg(new_value)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(if ok == 1 {
            RotateOutcome::Rotated
        } else {
            RotateOutcome::Mismatch
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory double (tests, local dev without Redis)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryBackend {
    entries: Arc<DashMap<String, String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set_ex(&self, key: &str, value: String, _ttl_secs: u64) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        _ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(e) => {
                e.insert(value);
                Ok(true)
            }
        }
    }

    async fn take_token(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now_unix_ms: i64,
    ) -> Result<TokenBucketOutcome, StoreError> {
        use dashmap::mapref::entry::Entry;
        let mut tokens;
        let mut last_ms;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let (t, l) = parse_bucket(e.get());
                tokens = t;
                last_ms = l;
                let elapsed_s = ((now_unix_ms - last_ms).max(0)) as f64 / 1000.0;
                tokens = (tokens + elapsed_s * refill_rate).min(capacity);
                let admitted = tokens >= 1.0;
                if admitted {
                    tokens -= 1.0;
                }
                last_ms = now_unix_ms;
                e.insert(format!("{tokens}:{last_ms}"));
                return Ok(TokenBucketOutcome {
                    admitted,
                    tokens_remaining: tokens,
                });
            }
            Entry::Vacant(e) => {
                tokens = capacity;
                last_ms = now_unix_ms;
                let admitted = tokens >= 1.0;
                if admitted {
                    tokens -= 1.0;
                }
                e.insert(format!("{tokens}:{last_ms}"));
                Ok(TokenBucketOutcome {
                    admitted,
                    tokens_remaining: tokens,
                })
            }
        }
    }

    async fn compare_and_rotate(
        &self,
        key: &str,
        presented_hash: &str,
        new_value: String,
        _ttl_secs: u64,
    ) -> Result<RotateOutcome, StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get() == presented_hash {
                    e.insert(new_value);
                    Ok(RotateOutcome::Rotated)
                } else {
                    Ok(RotateOutcome::Mismatch)
                }
            }
            Entry::Vacant(_) => Ok(RotateOutcome::Mismatch),
        }
    }
}

fn parse_bucket(raw: &str) -> (f64, i64) {
    match raw.split_once(':') {
        Some((t, l)) => (
            t.parse().unwrap_or(0.0),
            l.parse().unwrap_or(0),
        ),
        None => (0.0, 0),
    }
}
