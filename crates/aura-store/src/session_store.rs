//! Session half of the Session & Quota Store: `session:<id> -> {tenant,
//! refresh_token_hash, expires_at}`, with single-use refresh-token
//! rotation (spec §4.6).
//!
//! Rotation is implemented as an optimistic compare-and-swap over the
//! whole serialized record: the caller snapshots the current record,
//! builds the rotated replacement, and the backend only commits it if
//! nothing else has changed the key in between. A CAS miss — whether
//! from a genuine replay or a race with a second legitimate rotation —
//! is treated as a detected replay and the session is invalidated
//! (fail-closed), per the spec's step-3 invariant.

use aura_core::crypto::hash_refresh_token;
use aura_core::types::{Session, UserLevel};
use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::{RotateOutcome, StoreBackend};
use crate::error::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unauthenticated: unknown or expired session")]
    Unauthenticated,
    #[error("refresh token reuse detected; session invalidated")]
    ReplayDetected,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SessionStore {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    session_ttl_seconds: u64,
}

/// Issued to the client: `<session_id>.<opaque secret>`. The session id is
/// embedded so rotation can address the record directly; only `H(token)` is
/// ever persisted or compared.
#[derive(Debug, Clone)]
pub struct RefreshToken(pub String);

impl RefreshToken {
    fn session_id(&self) -> Option<Uuid> {
        self.0.split('.').next().and_then(|s| Uuid::parse_str(s).ok())
    }

    fn generate(session_id: Uuid) -> Self {
        let mut secret = [0u8; 32];
        SystemRandom::new()
            .fill(&mut secret)
            .expect("system entropy source unavailable");
        RefreshToken(format!("{session_id}.{}", hex_encode(&secret)))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: &str, session_ttl_seconds: u64) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.to_string(),
            session_ttl_seconds,
        }
    }

    fn key(&self, session_id: Uuid) -> String {
        format!("{}:session:{session_id}", self.key_prefix)
    }

    /// Creates a session and returns the raw refresh token to hand to the
    /// client (the token itself is never persisted, only its hash).
    pub async fn create_session(
        &self,
        tenant_id: Uuid,
        user_level: UserLevel,
    ) -> Result<(Session, RefreshToken), SessionError> {
        let session_id = Uuid::new_v4();
        let token = RefreshToken::generate(session_id);
        let now = Utc::now();
        let session = Session {
            id: session_id,
            tenant_id,
            refresh_token_hash: hash_refresh_token(&token.0),
            issued_at: now,
            expires_at: now + Duration::seconds(self.session_ttl_seconds as i64),
            user_level,
        };
        let raw = serde_json::to_string(&session)?;
        self.backend
            .set_ex(&self.key(session_id), raw, self.session_ttl_seconds)
            .await?;
        Ok((session, token))
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session, SessionError> {
        let raw = self
            .backend
            .get(&self.key(session_id))
            .await?
            .ok_or(SessionError::Unauthenticated)?;
        let session: Session = serde_json::from_str(&raw)?;
        if session.is_expired(Utc::now()) {
            return Err(SessionError::Unauthenticated);
        }
        Ok(session)
    }

    /// Single-use refresh-token rotation. On success returns the rotated
    /// `Session` and the new refresh token to hand back to the client.
    pub async fn rotate(&self, presented: &RefreshToken) -> Result<(Session, RefreshToken), SessionError> {
        let session_id = presented.session_id().ok_or(SessionError::Unauthenticated)?;
        let key = self.key(session_id);

        let raw = self
            .backend
            .get(&key)
            .await?
            .ok_or(SessionError::Unauthenticated)?;
        let mut session: Session = serde_json::from_str(&raw)?;

        if session.is_expired(Utc::now()) || session.refresh_token_hash != hash_refresh_token(&presented.0) {
            // Either a legitimate expiry or a replay of an already-consumed
            // token: fail closed by invalidating outright.
            self.backend.del(&key).await?;
            return Err(SessionError::ReplayDetected);
        }

        let new_token = RefreshToken::generate(session_id);
        let now = Utc::now();
        session.refresh_token_hash = hash_refresh_token(&new_token.0);
        session.issued_at = now;
        session.expires_at = now + Duration::seconds(self.session_ttl_seconds as i64);
        let new_raw = serde_json::to_string(&session)?;

        match self
            .backend
            .compare_and_rotate(&key, &raw, new_raw, self.session_ttl_seconds)
            .await?
        {
            RotateOutcome::Rotated => Ok((session, new_token)),
            RotateOutcome::Mismatch => {
                // Raced with a concurrent rotation/replay; invalidate.
                self.backend.del(&key).await.ok();
                Err(SessionError::ReplayDetected)
            }
        }
    }

    pub async fn logout(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.backend.del(&self.key(session_id)).await
    }
}
