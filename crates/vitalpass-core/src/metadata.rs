//! Metadata Descriptor wire types
//!
//! The descriptor is the encrypted off-chain index for the two-level
//! (`Indexed`) catalog form: one descriptor blob listing the data blobs
//! for a data type. It travels as JSON and must stay forward-readable
//! across `schema_version` bumps, so decoding ignores unknown fields
//! rather than rejecting them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::types::BlobRef;

/// Current descriptor schema version
pub const SCHEMA_VERSION: u32 = 1;

/// One referenced data blob.
///
/// Entries keep insertion order; `created_at` exists so consumers that
/// need chronology sort on it explicitly instead of assuming the list is
/// time-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub blob_id: BlobRef,
    pub created_at: DateTime<Utc>,
}

/// Encrypted off-chain index listing the data blobs for one data type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataDescriptor {
    pub schema_version: u32,
    pub entries: Vec<DescriptorEntry>,
}

impl MetadataDescriptor {
    /// A fresh descriptor holding a single entry
    pub fn single(blob_id: BlobRef) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            entries: vec![DescriptorEntry {
                blob_id,
                created_at: Utc::now(),
            }],
        }
    }

    /// Append a new entry, rejecting a blob id that is already listed.
    pub fn push(&mut self, blob_id: BlobRef) -> Result<()> {
        if self.entries.iter().any(|e| e.blob_id == blob_id) {
            return Err(VaultError::Internal(format!(
                "descriptor already references blob {blob_id}"
            )));
        }
        self.entries.push(DescriptorEntry {
            blob_id,
            created_at: Utc::now(),
        });
        Ok(())
    }

    /// Blob ids in insertion order
    pub fn blob_ids(&self) -> Vec<BlobRef> {
        self.entries.iter().map(|e| e.blob_id.clone()).collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a descriptor, tolerating fields added by newer writers.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let descriptor: MetadataDescriptor = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::InvalidCiphertext(format!("descriptor decode failed: {e}")))?;
        if descriptor.entries.iter().any(|e| e.blob_id.is_empty()) {
            return Err(VaultError::InvalidCiphertext(
                "descriptor references an empty blob id".to_string(),
            ));
        }
        Ok(descriptor)
    }
}
