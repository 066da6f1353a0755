//! Request/response types for the blob store API

use serde::{Deserialize, Serialize};

/// Storage client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL of the blob store, e.g. `http://localhost:8080`
    pub base_url: String,

    /// Optional bearer token sent as `Authorization: Bearer ...`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Receipt returned by the store for an uploaded blob.
///
/// The id is minted server-side from the content and is opaque to
/// callers; its format may change without notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutBlobReceipt {
    /// Opaque content id for the stored bytes
    pub blob_id: String,

    /// Size of the stored blob in bytes
    #[serde(default)]
    pub size_bytes: u64,
}
