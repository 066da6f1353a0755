//! Configuration for the record vault

use serde::{Deserialize, Serialize};

/// Orchestrator configuration.
///
/// All fields default sensibly for a single-user client; endpoints for
/// the blob store and key-holding services live in their own client
/// configs (`StorageConfig`, `KeyHolderConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Capability session TTL in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Retry budget for transient failures (quorum/storage)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// How often a raced catalog write is re-read and retried
    #[serde(default = "default_write_conflict_retries")]
    pub write_conflict_retries: u32,

    /// Fixed quorum override; `None` uses the default 2-of-N policy
    #[serde(default)]
    pub threshold: Option<u8>,
}

fn default_session_ttl_secs() -> u64 {
    900
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_write_conflict_retries() -> u32 {
    3
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            write_conflict_retries: default_write_conflict_retries(),
            threshold: None,
        }
    }
}
