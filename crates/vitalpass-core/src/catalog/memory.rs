//! In-memory catalog ledger
//!
//! Backs tests and local development with the same CAS contract the
//! on-chain ledger provides.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::CatalogLedger;
use crate::error::{Result, VaultError};
use crate::types::{CatalogRecord, DataType, EntryPointer, PassportId};

pub struct MemoryLedger {
    records: DashMap<String, CatalogRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    fn key(passport_id: &PassportId, data_type: DataType) -> String {
        format!("{passport_id}:{data_type}")
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogLedger for MemoryLedger {
    async fn get(
        &self,
        passport_id: &PassportId,
        data_type: DataType,
    ) -> Result<Option<CatalogRecord>> {
        Ok(self
            .records
            .get(&Self::key(passport_id, data_type))
            .map(|r| r.clone()))
    }

    async fn compare_and_put(
        &self,
        passport_id: &PassportId,
        data_type: DataType,
        pointer: EntryPointer,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        // The dashmap entry holds its shard lock, making the
        // compare-and-put atomic against concurrent writers.
        match self.records.entry(Self::key(passport_id, data_type)) {
            Entry::Occupied(mut occupied) => {
                let found = occupied.get().version;
                if expected_version != Some(found) {
                    return Err(VaultError::VersionConflict {
                        data_type,
                        expected: expected_version,
                        found: Some(found),
                    });
                }
                let version = found + 1;
                occupied.insert(CatalogRecord {
                    pointer,
                    version,
                    updated_at: Utc::now(),
                });
                Ok(version)
            }
            Entry::Vacant(vacant) => {
                if expected_version.is_some() {
                    return Err(VaultError::VersionConflict {
                        data_type,
                        expected: expected_version,
                        found: None,
                    });
                }
                vacant.insert(CatalogRecord {
                    pointer,
                    version: 1,
                    updated_at: Utc::now(),
                });
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlobRef;

    #[tokio::test]
    async fn test_versions_increment_per_key() {
        let ledger = MemoryLedger::new();
        let passport = PassportId::new("pp-1");

        let v1 = ledger
            .compare_and_put(
                &passport,
                DataType::Medications,
                EntryPointer::Flat(vec![BlobRef::new("a")]),
                None,
            )
            .await
            .unwrap();
        let v2 = ledger
            .compare_and_put(
                &passport,
                DataType::Medications,
                EntryPointer::Flat(vec![BlobRef::new("a"), BlobRef::new("b")]),
                Some(v1),
            )
            .await
            .unwrap();
        assert_eq!((v1, v2), (1, 2));

        // Independent key, independent version sequence
        let other = ledger
            .compare_and_put(
                &passport,
                DataType::LabResults,
                EntryPointer::Flat(vec![BlobRef::new("x")]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(other, 1);
    }

    #[tokio::test]
    async fn test_stale_expected_version_conflicts() {
        let ledger = MemoryLedger::new();
        let passport = PassportId::new("pp-1");

        ledger
            .compare_and_put(
                &passport,
                DataType::Medications,
                EntryPointer::Flat(vec![BlobRef::new("a")]),
                None,
            )
            .await
            .unwrap();

        let err = ledger
            .compare_and_put(
                &passport,
                DataType::Medications,
                EntryPointer::Flat(vec![BlobRef::new("b")]),
                Some(7),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn test_create_requires_no_expected_version() {
        let ledger = MemoryLedger::new();
        let passport = PassportId::new("pp-1");

        let err = ledger
            .compare_and_put(
                &passport,
                DataType::Medications,
                EntryPointer::Flat(vec![BlobRef::new("a")]),
                Some(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::VersionConflict { found: None, .. }
        ));
    }
}
