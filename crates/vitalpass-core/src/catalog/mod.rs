//! Entry Catalog
//!
//! Per `(passport, data type)`, the catalog tracks one pointer to the
//! current encrypted material: either an ordered list of data-blob
//! references or a single Metadata Descriptor reference. The ledger
//! behind it is the on-chain contract; this module enforces everything
//! the chain cannot see — owner authorization, reference validation,
//! duplicate rejection, and append/replace semantics — before any
//! mutation reaches the ledger.
//!
//! Writes are optimistic: every record carries a version stamp, writers
//! present the version they read, and a stale stamp fails with
//! `VersionConflict` so the caller re-reads and retries. Read-then-write
//! sequences are NOT atomic without it.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::types::{
    BlobRef, CatalogRecord, DataType, EntryPointer, OwnerIdentity, Passport, PassportId, WriteMode,
};

pub use memory::MemoryLedger;

/// The on-chain storage contract the catalog runs against.
///
/// `compare_and_put` is a CAS: `expected_version` of `None` means the
/// record must not exist yet; any mismatch fails with `VersionConflict`
/// and mutates nothing.
#[async_trait]
pub trait CatalogLedger: Send + Sync {
    async fn get(
        &self,
        passport_id: &PassportId,
        data_type: DataType,
    ) -> Result<Option<CatalogRecord>>;

    /// Returns the new version on success.
    async fn compare_and_put(
        &self,
        passport_id: &PassportId,
        data_type: DataType,
        pointer: EntryPointer,
        expected_version: Option<u64>,
    ) -> Result<u64>;
}

/// Catalog semantics over a ledger backend.
pub struct EntryCatalog {
    ledger: Arc<dyn CatalogLedger>,
}

impl EntryCatalog {
    pub fn new(ledger: Arc<dyn CatalogLedger>) -> Self {
        Self { ledger }
    }

    pub async fn has_entry(&self, passport_id: &PassportId, data_type: DataType) -> Result<bool> {
        Ok(self.ledger.get(passport_id, data_type).await?.is_some())
    }

    /// Current record with its version stamp, or `None` before the
    /// first write.
    pub async fn get_entry(
        &self,
        passport_id: &PassportId,
        data_type: DataType,
    ) -> Result<Option<CatalogRecord>> {
        self.ledger.get(passport_id, data_type).await
    }

    /// Write a data-blob reference.
    ///
    /// `Append` pushes onto the flat history, rejecting a reference that
    /// is already present. `Replace` swaps the pointer to exactly the
    /// new reference. Only the passport owner may write; reference order
    /// within a data type is insertion order and survives reads.
    pub async fn write_entry(
        &self,
        caller: &OwnerIdentity,
        passport: &Passport,
        data_type: DataType,
        payload_ref: BlobRef,
        mode: WriteMode,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.authorize(caller, passport)?;
        if payload_ref.is_empty() {
            return Err(VaultError::EmptyReference { data_type });
        }

        let pointer = match mode {
            WriteMode::Replace => EntryPointer::Flat(vec![payload_ref.clone()]),
            WriteMode::Append => {
                let current = self.ledger.get(&passport.passport_id, data_type).await?;
                match current.map(|r| r.pointer) {
                    None => EntryPointer::Flat(vec![payload_ref.clone()]),
                    Some(EntryPointer::Flat(mut refs)) => {
                        if refs.contains(&payload_ref) {
                            return Err(VaultError::DuplicateReference {
                                data_type,
                                blob_id: payload_ref.to_string(),
                            });
                        }
                        refs.push(payload_ref.clone());
                        EntryPointer::Flat(refs)
                    }
                    Some(EntryPointer::Indexed(meta_ref)) => {
                        if meta_ref == payload_ref {
                            return Err(VaultError::DuplicateReference {
                                data_type,
                                blob_id: payload_ref.to_string(),
                            });
                        }
                        // History for an indexed entry lives inside its
                        // descriptor; rewrite the descriptor and swap
                        // the pointer instead.
                        return Err(VaultError::Internal(format!(
                            "append to an indexed {data_type} entry requires a descriptor rewrite"
                        )));
                    }
                }
            }
        };

        let version = self
            .ledger
            .compare_and_put(&passport.passport_id, data_type, pointer, expected_version)
            .await?;

        debug!(
            passport_id = %passport.passport_id,
            data_type = %data_type,
            blob_id = %payload_ref,
            ?mode,
            version,
            "Catalog entry written"
        );
        Ok(version)
    }

    /// Swap the pointer to a freshly written Metadata Descriptor blob
    /// (the two-level form).
    pub async fn replace_descriptor(
        &self,
        caller: &OwnerIdentity,
        passport: &Passport,
        data_type: DataType,
        meta_ref: BlobRef,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.authorize(caller, passport)?;
        if meta_ref.is_empty() {
            return Err(VaultError::EmptyReference { data_type });
        }

        let version = self
            .ledger
            .compare_and_put(
                &passport.passport_id,
                data_type,
                EntryPointer::Indexed(meta_ref.clone()),
                expected_version,
            )
            .await?;

        debug!(
            passport_id = %passport.passport_id,
            data_type = %data_type,
            meta_ref = %meta_ref,
            version,
            "Catalog descriptor pointer written"
        );
        Ok(version)
    }

    // Explicit ACL: only the passport owner may mutate its entries.
    fn authorize(&self, caller: &OwnerIdentity, passport: &Passport) -> Result<()> {
        if caller != &passport.owner {
            return Err(VaultError::AccessDenied(format!(
                "caller {caller} does not own passport {}",
                passport.passport_id
            )));
        }
        Ok(())
    }
}
