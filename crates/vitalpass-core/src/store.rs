//! Blob store boundary
//!
//! The content-addressed store is external and dumb: bytes in, opaque id
//! out. Everything uploaded through this trait is ciphertext; the store
//! never sees plaintext or key material.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};
use crate::types::BlobRef;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning the store-minted content id
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef>;

    /// Fetch bytes for a known id; `NotFound` for unknown ids
    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>>;

    async fn exists(&self, blob: &BlobRef) -> Result<bool>;
}

/// In-memory content-addressed store for tests and local development.
///
/// Ids follow the `sha256-<hex>` shape, so identical bytes map to the
/// same id — which is exactly what makes duplicate-reference detection
/// observable in tests.
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        let id = format!("sha256-{}", hex::encode(Sha256::digest(bytes)));
        self.blobs.insert(id.clone(), bytes.to_vec());
        Ok(BlobRef::new(id))
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        self.blobs
            .get(blob.as_str())
            .map(|b| b.clone())
            .ok_or_else(|| VaultError::NotFound(format!("blob {blob}")))
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool> {
        Ok(self.blobs.contains_key(blob.as_str()))
    }
}

#[async_trait]
impl BlobStore for vitalpass_storage_client::StorageClient {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        let receipt = self.put_blob(bytes, "application/octet-stream").await?;
        Ok(BlobRef::new(receipt.blob_id))
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        Ok(self.get_blob(blob.as_str()).await?)
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool> {
        Ok(self.blob_exists(blob.as_str()).await?)
    }
}
