use std::time::Duration;
use thiserror::Error;
use crate::types::ids::{EntityId, SourceId};

#[derive(Error, Debug)]
pub enum Error {
    // Source Errors
    #[error("Credentials rejected by source {source_id}: {reason}")]
    CredentialRejected {
        source_id: SourceId,
        reason: String,
    },

    #[error("No active price sources")]
    NoActiveSources,

    #[error("Unknown price source: {0}")]
    UnknownSource(SourceId),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    // Persistence Errors
    #[error("Persistence store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // Registry Errors
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single source request, normalized at the adapter boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("credential rejected: {0}")]
    Credential(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response: {0}")]
    Data(String),
}

impl SourceError {
    /// Throttling and transport failures are worth another attempt; bad data and bad keys are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::RateLimited { .. } | SourceError::Network(_) | SourceError::Timeout
        )
    }

    pub fn is_credential(&self) -> bool {
        matches!(self, SourceError::Credential(_))
    }

    /// Stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Credential(_) => "credential",
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::Network(_) => "network",
            SourceError::Timeout => "timeout",
            SourceError::Data(_) => "data",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("entity not registered: {0}")]
    EntityNotFound(EntityId),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("not supported by this store: {0}")]
    Unsupported(&'static str),
}

impl StorageError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
