//! Error types for REM operations

use crate::EncryptionLevel;
use thiserror::Error;
use uuid::Uuid;

/// KMS adapter errors.
///
/// `Unavailable` is the only retryable kind; auth and corruption failures are
/// fatal to the operation and surfaced as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KmsError {
    #[error("KMS unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("KMS authentication failed: {reason}")]
    AuthError { reason: String },

    #[error("KMS returned malformed ciphertext: {reason}")]
    Corrupt { reason: String },
}

impl KmsError {
    pub fn retryable(&self) -> bool {
        matches!(self, KmsError::Unavailable { .. })
    }
}

/// Envelope-encryption errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Wrong key or tampered ciphertext. Treated as a data-integrity error;
    /// never auto-retried.
    #[error("decryption authentication failed for entity {entity_id}")]
    DecryptAuthFail { entity_id: Uuid },

    /// Row was written under a mode the current tenant state cannot serve
    /// (e.g. sealed row, no public key registered).
    #[error("mode mismatch reading entity {entity_id}: row level {row_level}")]
    ModeMismatch {
        entity_id: Uuid,
        row_level: EncryptionLevel,
    },

    #[error("no encryption key configured for tenant {tenant_id}")]
    EncryptKeyMissing { tenant_id: String },

    #[error("deterministic encryption refused: DEK rotated after field family was written for tenant {tenant_id}")]
    RotationUnsupported { tenant_id: String },

    #[error("malformed ciphertext envelope: {reason}")]
    MalformedCiphertext { reason: String },

    #[error(transparent)]
    Kms(#[from] KmsError),
}

/// Storage layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// DB timeout or unavailability; callers may retry with jitter.
    #[error("transient store failure: {reason}")]
    Transient { reason: String },

    #[error("entity not found: {table} id {id}")]
    NotFound { table: String, id: Uuid },

    #[error("table {table} is not registered in the schema registry")]
    UnknownTable { table: String },

    /// Registry rows and installed triggers disagree; suggests migrate.
    #[error("schema drift on {table}: {detail}")]
    SchemaDrift { table: String, detail: String },

    #[error("row conversion failed for {table}: {reason}")]
    Conversion { table: String, reason: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Classify a driver error: connection-level failures are transient,
    /// everything else is a plain database error.
    pub fn from_db(err: &(dyn std::error::Error + 'static), closed: bool, timeout: bool) -> Self {
        if closed || timeout {
            StoreError::Transient {
                reason: err.to_string(),
            }
        } else {
            StoreError::Database(err.to_string())
        }
    }
}

/// REM query-dialect errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("empty query")]
    Empty,

    #[error("write keyword '{keyword}' rejected in read-only SQL")]
    WriteRejected { keyword: String },

    #[error("unknown table in query: {table}")]
    UnknownTable { table: String },
}

/// Task queue and scheduler errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task not found: {id}")]
    TaskNotFound { id: Uuid },

    #[error("task {id} is not claimable in status {status}")]
    NotClaimable { id: Uuid, status: String },

    /// User is over plan quota; the task is skipped, never failed.
    #[error("quota exceeded for user {user_id} on {resource_type}: {used}/{limit}")]
    QuotaExceeded {
        user_id: Uuid,
        resource_type: String,
        used: i64,
        limit: i64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("no provider configured")]
    ProviderNotConfigured,

    #[error("request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("embedding failed: {reason}")]
    EmbeddingFailed { reason: String },

    #[error("stream aborted: {reason}")]
    StreamAborted { reason: String },
}

/// Agent adapter errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent not found: {name}")]
    NotFound { name: String },

    #[error("agent {name} schema is malformed: {reason}")]
    MalformedSchema { name: String, reason: String },

    #[error("structured output did not match declared properties: {reason}")]
    OutputMismatch { reason: String },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Memory/session pipeline errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: Uuid },

    #[error("turn persistence failed: {reason}")]
    TurnFailed { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Top-level umbrella error.
#[derive(Debug, Error)]
pub enum RemError {
    #[error(transparent)]
    Kms(#[from] KmsError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("configuration error: {field}: {reason}")]
    Config { field: String, reason: String },
}

/// Convenience alias used across the workspace.
pub type RemResult<T> = Result<T, RemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(KmsError::Unavailable {
            reason: "conn refused".into()
        }
        .retryable());
        assert!(!KmsError::AuthError {
            reason: "denied".into()
        }
        .retryable());
        assert!(!KmsError::Corrupt {
            reason: "short ct".into()
        }
        .retryable());
    }

    #[test]
    fn kms_error_converts_through_umbrella() {
        let err: RemError = KmsError::Unavailable {
            reason: "timeout".into(),
        }
        .into();
        assert!(matches!(err, RemError::Kms(_)));
    }
}
