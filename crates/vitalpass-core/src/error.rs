//! Error types for vitalpass-core

use thiserror::Error;

use crate::types::DataType;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault error taxonomy.
///
/// Validation errors (`InvalidDataType`, `EmptyReference`,
/// `DuplicateReference`, `InvalidThreshold`) are local and never
/// retryable. `QuorumUnavailable` and `StorageUnavailable` are
/// transient; the orchestrator retries them with bounded backoff.
/// `AccessDenied` and `InvalidCiphertext` indicate a policy or data
/// problem and are never retried automatically.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Data type key is not in the recognized vocabulary
    #[error("Unrecognized data type: {key:?}")]
    InvalidDataType { key: String },

    /// Blob reference was empty
    #[error("Empty blob reference for data type {data_type}")]
    EmptyReference { data_type: DataType },

    /// Append would insert a reference that is already present
    #[error("Duplicate blob reference {blob_id} for data type {data_type}")]
    DuplicateReference { data_type: DataType, blob_id: String },

    /// No entry yet — an empty state, not a failure
    #[error("Not found: {0}")]
    NotFound(String),

    /// Capability session has passed its expiry
    #[error("Capability session expired at {expired_at}")]
    SessionExpired { expired_at: i64 },

    /// Capability session was never signed
    #[error("Capability session is unsigned")]
    SessionUnsigned,

    /// Key-holding services rejected the access proof
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Fewer than `threshold` services responded
    #[error("Quorum unavailable: {0}")]
    QuorumUnavailable(String),

    /// Ciphertext envelope is structurally corrupt
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Blob store transient failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Catalog write raced another writer; re-read and retry
    #[error("Version conflict for data type {data_type}: expected {expected:?}, found {found:?}")]
    VersionConflict {
        data_type: DataType,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Threshold outside `1 <= t <= service_count`
    #[error("Invalid threshold {threshold} for {service_count} key-holding services")]
    InvalidThreshold { threshold: u8, service_count: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether the orchestrator may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::QuorumUnavailable(_) | VaultError::StorageUnavailable(_)
        )
    }

    /// Whether this is the "no data yet" empty state rather than a real
    /// failure.
    pub fn is_empty_state(&self) -> bool {
        matches!(self, VaultError::NotFound(_))
    }
}

impl From<vitalpass_storage_client::StorageError> for VaultError {
    fn from(err: vitalpass_storage_client::StorageError) -> Self {
        use vitalpass_storage_client::StorageError;
        match err {
            StorageError::NotFound(id) => VaultError::NotFound(format!("blob {id}")),
            other => VaultError::StorageUnavailable(other.to_string()),
        }
    }
}
