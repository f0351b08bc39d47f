use aura_core::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("not found")]
    NotFound,
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::BackendUnavailable(_) => ErrorKind::Transient,
            StoreError::Serde(_) => ErrorKind::Internal,
            StoreError::NotFound => ErrorKind::Validation,
            StoreError::PreconditionFailed(_) => ErrorKind::Validation,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::BackendUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e.to_string())
    }
}
