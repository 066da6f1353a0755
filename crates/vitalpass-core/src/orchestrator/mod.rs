//! Entry Orchestrator
//!
//! Glues the catalog, gateway, blob store, registry, and session layer
//! into the exposed operations: `save`, `load`, `load_all`, `has`, and
//! `mint_passport`.
//!
//! Write path: derive policy → encrypt → put ciphertext → read the
//! catalog entry → write the reference (append or replace), re-reading
//! and retrying a bounded number of times if another write raced ours.
//!
//! Read path: catalog → (descriptor →) data blobs → decrypt → merge in
//! reference order. Multi-type loads scatter/gather independently; one
//! data type's failure never aborts the others.
//!
//! Retry policy: quorum and storage outages back off exponentially
//! within a bounded budget; session errors are recovered once by
//! re-signing; policy rejections and corrupt ciphertext are surfaced
//! immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogLedger, EntryCatalog};
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::gateway::{default_threshold, BackupKeyMaterial, KeyHolder, ThresholdGateway};
use crate::metadata::MetadataDescriptor;
use crate::policy::PolicyBinding;
use crate::registry::OwnerRegistry;
use crate::session::{SessionManager, Signer};
use crate::store::BlobStore;
use crate::types::{
    BlobRef, CatalogRecord, DataType, EntryPointer, OwnerIdentity, Passport, WriteMode,
};

/// Outcome of one save
#[derive(Debug)]
pub struct SaveReceipt {
    pub data_type: DataType,
    /// Ciphertext blob holding the saved records
    pub blob_id: BlobRef,
    pub mode: WriteMode,
    /// Catalog version after the write
    pub version: u64,
    /// Owner-held recovery key for this blob; export it or lose it
    pub backup_key: BackupKeyMaterial,
}

/// Decoded records for one data type
#[derive(Debug, Clone)]
pub struct TypedRecords {
    pub data_type: DataType,
    pub records: Vec<Value>,
}

/// One failed leg of a batch load
#[derive(Debug)]
pub struct TypedFailure {
    pub data_type: DataType,
    pub error: VaultError,
}

/// Aggregated result of a multi-type load: partial success by design.
#[derive(Debug, Default)]
pub struct BatchLoad {
    pub loaded: Vec<TypedRecords>,
    pub failures: Vec<TypedFailure>,
}

impl BatchLoad {
    pub fn records_for(&self, data_type: DataType) -> Option<&[Value]> {
        self.loaded
            .iter()
            .find(|t| t.data_type == data_type)
            .map(|t| t.records.as_slice())
    }

    pub fn failure_for(&self, data_type: DataType) -> Option<&VaultError> {
        self.failures
            .iter()
            .find(|f| f.data_type == data_type)
            .map(|f| &f.error)
    }

    /// True when every requested leg loaded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The read/write pipeline for one owner's health records.
pub struct RecordVault {
    owner: OwnerIdentity,
    catalog: EntryCatalog,
    gateway: ThresholdGateway,
    store: Arc<dyn BlobStore>,
    registry: Arc<dyn OwnerRegistry>,
    sessions: SessionManager,
    config: VaultConfig,
}

impl RecordVault {
    pub fn new(
        owner: OwnerIdentity,
        signer: Arc<dyn Signer>,
        ledger: Arc<dyn CatalogLedger>,
        holders: Vec<Arc<dyn KeyHolder>>,
        store: Arc<dyn BlobStore>,
        registry: Arc<dyn OwnerRegistry>,
        config: VaultConfig,
    ) -> Self {
        let sessions = SessionManager::new(owner.clone(), signer, config.session_ttl_secs);
        Self {
            owner,
            catalog: EntryCatalog::new(ledger),
            gateway: ThresholdGateway::new(holders),
            store,
            registry,
            sessions,
            config,
        }
    }

    /// Mint this owner's passport, or return the existing one.
    pub async fn mint_passport(
        &self,
        country_code: &str,
        analytics_opt_in: bool,
    ) -> Result<Passport> {
        self.registry
            .create(&self.owner, country_code, analytics_opt_in)
            .await
    }

    /// Whether any data has been saved for this data type yet.
    pub async fn has(&self, passport: &Passport, data_type: DataType) -> Result<bool> {
        self.catalog.has_entry(&passport.passport_id, data_type).await
    }

    /// Encrypt and store a batch of records for one data type.
    ///
    /// With no explicit `mode`, the data type's default applies:
    /// snapshot types replace, cumulative logs append.
    pub async fn save(
        &self,
        passport: &Passport,
        data_type: DataType,
        records: &[Value],
        mode: Option<WriteMode>,
    ) -> Result<SaveReceipt> {
        let binding = PolicyBinding::derive(passport.policy_identity(), data_type);
        let threshold = self.threshold();
        let mode = mode.unwrap_or_else(|| data_type.default_write_mode());

        let plaintext = serde_json::to_vec(records)?;
        let (envelope, backup_key) = self
            .gateway
            .encrypt(&plaintext, &binding, threshold)
            .await?;
        let envelope_bytes = envelope.to_bytes()?;
        let blob_id = self
            .retry_transient("blob put", || self.store.put(&envelope_bytes))
            .await?;

        // Read-decide-write with optimistic concurrency: a stale stamp
        // means another write landed between our read and ours, so
        // re-read and retry within the configured budget.
        let mut conflicts = 0u32;
        let version = loop {
            let current = self
                .catalog
                .get_entry(&passport.passport_id, data_type)
                .await?;

            let result = match current {
                Some(ref record) if matches!(record.pointer, EntryPointer::Indexed(_)) => {
                    self.write_indexed(passport, data_type, &binding, record, &blob_id, mode)
                        .await
                }
                ref current => {
                    let expected = current.as_ref().map(|r| r.version);
                    self.catalog
                        .write_entry(
                            &self.owner,
                            passport,
                            data_type,
                            blob_id.clone(),
                            mode,
                            expected,
                        )
                        .await
                }
            };

            match result {
                Ok(version) => break version,
                Err(e @ VaultError::VersionConflict { .. }) => {
                    if conflicts >= self.config.write_conflict_retries {
                        return Err(e);
                    }
                    conflicts += 1;
                    warn!(
                        data_type = %data_type,
                        attempt = conflicts,
                        "Catalog write raced another writer, re-reading"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            passport_id = %passport.passport_id,
            data_type = %data_type,
            blob_id = %blob_id,
            ?mode,
            version,
            "Saved health record batch"
        );

        Ok(SaveReceipt {
            data_type,
            blob_id,
            mode,
            version,
            backup_key,
        })
    }

    /// Load and decode every record saved under one data type.
    ///
    /// `NotFound` means "no data yet" — an empty state, not a fault.
    /// Multiple entries merge by concatenation in reference order.
    pub async fn load(&self, passport: &Passport, data_type: DataType) -> Result<Vec<Value>> {
        let Some(record) = self
            .catalog
            .get_entry(&passport.passport_id, data_type)
            .await?
        else {
            return Err(VaultError::NotFound(format!(
                "no {data_type} entry for passport {}",
                passport.passport_id
            )));
        };

        let binding = PolicyBinding::derive(passport.policy_identity(), data_type);

        let refs = match &record.pointer {
            EntryPointer::Flat(refs) => refs.clone(),
            EntryPointer::Indexed(meta_ref) => {
                let meta_bytes = self
                    .retry_transient("metadata blob get", || self.store.get(meta_ref))
                    .await?;
                let plain = self
                    .decrypt_with_session(passport, &binding, &meta_bytes)
                    .await?;
                MetadataDescriptor::decode(&plain)?.blob_ids()
            }
        };

        // Concurrent legs; join_all preserves reference order.
        let binding = &binding;
        let legs = refs.iter().map(|blob_ref| async move {
            let bytes = self
                .retry_transient("blob get", || self.store.get(blob_ref))
                .await?;
            let plain = self
                .decrypt_with_session(passport, binding, &bytes)
                .await?;
            let records: Vec<Value> = serde_json::from_slice(&plain).map_err(|e| {
                VaultError::InvalidCiphertext(format!(
                    "decrypted payload of {blob_ref} is not a record batch: {e}"
                ))
            })?;
            Ok::<_, VaultError>(records)
        });

        let mut merged = Vec::new();
        for leg in join_all(legs).await {
            merged.extend(leg?);
        }

        debug!(
            passport_id = %passport.passport_id,
            data_type = %data_type,
            records = merged.len(),
            "Loaded health record batch"
        );
        Ok(merged)
    }

    /// Load several data types independently.
    ///
    /// Legs fan out concurrently and never short-circuit each other: the
    /// result aggregates per-type successes and per-type failures, with
    /// `NotFound` legs reported like any other failure for the caller to
    /// treat as empty.
    pub async fn load_all(&self, passport: &Passport, data_types: &[DataType]) -> BatchLoad {
        let legs = data_types
            .iter()
            .map(|dt| async move { (*dt, self.load(passport, *dt).await) });

        let mut batch = BatchLoad::default();
        for (data_type, outcome) in join_all(legs).await {
            match outcome {
                Ok(records) => batch.loaded.push(TypedRecords { data_type, records }),
                Err(error) => {
                    warn!(
                        data_type = %data_type,
                        error = %error,
                        "Batch load leg failed"
                    );
                    batch.failures.push(TypedFailure { data_type, error });
                }
            }
        }
        batch
    }

    fn threshold(&self) -> u8 {
        self.config
            .threshold
            .unwrap_or_else(|| default_threshold(self.gateway.service_count()))
    }

    // Write onto an entry that already uses the two-level form: the
    // history lives inside the descriptor, so append rewrites it and
    // the catalog pointer swaps to the new descriptor blob.
    async fn write_indexed(
        &self,
        passport: &Passport,
        data_type: DataType,
        binding: &PolicyBinding,
        current: &CatalogRecord,
        new_blob: &BlobRef,
        mode: WriteMode,
    ) -> Result<u64> {
        let EntryPointer::Indexed(meta_ref) = &current.pointer else {
            return Err(VaultError::Internal(
                "write_indexed called on a flat pointer".to_string(),
            ));
        };

        let descriptor = match mode {
            WriteMode::Replace => MetadataDescriptor::single(new_blob.clone()),
            WriteMode::Append => {
                let meta_bytes = self
                    .retry_transient("metadata blob get", || self.store.get(meta_ref))
                    .await?;
                let plain = self
                    .decrypt_with_session(passport, binding, &meta_bytes)
                    .await?;
                let mut descriptor = MetadataDescriptor::decode(&plain)?;
                if descriptor.entries.iter().any(|e| &e.blob_id == new_blob) {
                    return Err(VaultError::DuplicateReference {
                        data_type,
                        blob_id: new_blob.to_string(),
                    });
                }
                descriptor.push(new_blob.clone())?;
                descriptor
            }
        };

        let (envelope, _descriptor_key) = self
            .gateway
            .encrypt(&descriptor.encode()?, binding, self.threshold())
            .await?;
        let envelope_bytes = envelope.to_bytes()?;
        let meta_blob = self
            .retry_transient("metadata blob put", || self.store.put(&envelope_bytes))
            .await?;

        self.catalog
            .replace_descriptor(
                &self.owner,
                passport,
                data_type,
                meta_blob,
                Some(current.version),
            )
            .await
    }

    // Decrypt one envelope with a fresh access proof per attempt.
    //
    // Session errors are recovered once by re-signing; transient quorum
    // failures back off within the retry budget. A new proof is minted
    // per attempt because proofs are one-shot.
    async fn decrypt_with_session(
        &self,
        passport: &Passport,
        binding: &PolicyBinding,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let mut session_recovered = false;
        let mut attempt = 0u32;
        loop {
            let result = async {
                let session = self.sessions.current().await?;
                let proof =
                    session.build_access_proof(&passport.passport_id, &binding.policy_id)?;
                self.gateway.decrypt(ciphertext, &proof).await
            }
            .await;

            match result {
                Ok(plain) => return Ok(plain),
                Err(e @ (VaultError::SessionExpired { .. } | VaultError::SessionUnsigned)) => {
                    if session_recovered {
                        return Err(e);
                    }
                    session_recovered = true;
                    debug!(error = %e, "Regenerating capability session");
                    self.sessions.refresh().await?;
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.config.retry_base_delay_ms, attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient decrypt failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Bounded exponential backoff for transient blob-store failures.
    async fn retry_transient<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.config.retry_base_delay_ms, attempt);
                    warn!(
                        error = %e,
                        attempt,
                        op,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(8);
    Duration::from_millis(base_ms.saturating_mul(1 << shift))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryLedger;
    use crate::gateway::simulated::SimulatedKeyHolder;
    use crate::registry::MemoryRegistry;
    use crate::session::Ed25519Signer;
    use crate::store::MemoryBlobStore;
    use serde_json::json;

    struct Stack {
        vault: RecordVault,
        holders: Vec<Arc<SimulatedKeyHolder>>,
        ledger: Arc<MemoryLedger>,
        store: Arc<MemoryBlobStore>,
    }

    fn test_stack(service_count: usize) -> Stack {
        let signer = Ed25519Signer::generate();
        let owner = signer.owner_identity();
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryBlobStore::new());
        let holders: Vec<Arc<SimulatedKeyHolder>> = (0..service_count)
            .map(|i| Arc::new(SimulatedKeyHolder::generate(format!("holder-{i}"))))
            .collect();
        let dyn_holders: Vec<Arc<dyn KeyHolder>> = holders
            .iter()
            .map(|h| h.clone() as Arc<dyn KeyHolder>)
            .collect();

        let vault = RecordVault::new(
            owner,
            Arc::new(signer),
            ledger.clone(),
            dyn_holders,
            store.clone(),
            Arc::new(MemoryRegistry::new()),
            VaultConfig {
                retry_base_delay_ms: 1,
                ..VaultConfig::default()
            },
        );
        Stack {
            vault,
            holders,
            ledger,
            store,
        }
    }

    #[tokio::test]
    async fn test_fresh_passport_has_no_data() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();

        assert_eq!(passport.country_code, "JP");
        assert!(passport.analytics_opt_in);
        assert!(!stack
            .vault
            .has(&passport, DataType::BasicProfile)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();
        let records = vec![json!({"name": "amoxicillin", "dose_mg": 500})];

        let receipt = stack
            .vault
            .save(&passport, DataType::Medications, &records, None)
            .await
            .unwrap();
        assert_eq!(receipt.mode, WriteMode::Append);
        assert!(stack
            .vault
            .has(&passport, DataType::Medications)
            .await
            .unwrap());

        let loaded = stack
            .vault
            .load(&passport, DataType::Medications)
            .await
            .unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_append_merges_in_order() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();
        let first = vec![json!({"name": "m1"})];
        let second = vec![json!({"name": "m2"})];

        stack
            .vault
            .save(&passport, DataType::Medications, &first, None)
            .await
            .unwrap();
        stack
            .vault
            .save(&passport, DataType::Medications, &second, None)
            .await
            .unwrap();

        let loaded = stack
            .vault
            .load(&passport, DataType::Medications)
            .await
            .unwrap();
        assert_eq!(loaded, vec![json!({"name": "m1"}), json!({"name": "m2"})]);
    }

    #[tokio::test]
    async fn test_replace_keeps_only_latest_snapshot() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();

        stack
            .vault
            .save(
                &passport,
                DataType::BasicProfile,
                &[json!({"blood_type": "A+"})],
                None,
            )
            .await
            .unwrap();
        stack
            .vault
            .save(
                &passport,
                DataType::BasicProfile,
                &[json!({"blood_type": "AB+"})],
                None,
            )
            .await
            .unwrap();

        let loaded = stack
            .vault
            .load(&passport, DataType::BasicProfile)
            .await
            .unwrap();
        assert_eq!(loaded, vec![json!({"blood_type": "AB+"})]);
    }

    #[tokio::test]
    async fn test_load_without_data_is_not_found() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();

        match stack.vault.load(&passport, DataType::Conditions).await {
            Err(e) => assert!(e.is_empty_state(), "expected NotFound, got {e:?}"),
            Ok(records) => panic!("expected NotFound, got {records:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_survives_one_holder_outage() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();
        let records = vec![json!({"hr_bpm": 61})];

        stack
            .vault
            .save(&passport, DataType::SelfMetrics, &records, None)
            .await
            .unwrap();

        stack.holders[2].set_offline(true);
        let loaded = stack
            .vault
            .load(&passport, DataType::SelfMetrics)
            .await
            .unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_load_all_reports_per_type_outcomes() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();

        stack
            .vault
            .save(&passport, DataType::Medications, &[json!({"name": "m1"})], None)
            .await
            .unwrap();

        let batch = stack
            .vault
            .load_all(&passport, &[DataType::Medications, DataType::LabResults])
            .await;

        assert_eq!(
            batch.records_for(DataType::Medications),
            Some(&[json!({"name": "m1"})][..])
        );
        assert!(batch
            .failure_for(DataType::LabResults)
            .is_some_and(|e| e.is_empty_state()));
        assert!(!batch.is_complete());
    }

    #[tokio::test]
    async fn test_indexed_entry_append_and_load() {
        let stack = test_stack(3);
        let passport = stack.vault.mint_passport("JP", true).await.unwrap();

        // Seed a two-level entry: an encrypted descriptor listing one
        // existing data blob, the way older writers laid entries out.
        let binding = PolicyBinding::derive(passport.policy_identity(), DataType::LabResults);
        let data_plain = serde_json::to_vec(&vec![json!({"test": "hba1c"})]).unwrap();
        let (data_env, _) = stack
            .vault
            .gateway
            .encrypt(&data_plain, &binding, 2)
            .await
            .unwrap();
        let data_blob = stack
            .store
            .put(&data_env.to_bytes().unwrap())
            .await
            .unwrap();

        let descriptor = MetadataDescriptor::single(data_blob);
        let (meta_env, _) = stack
            .vault
            .gateway
            .encrypt(&descriptor.encode().unwrap(), &binding, 2)
            .await
            .unwrap();
        let meta_blob = stack
            .store
            .put(&meta_env.to_bytes().unwrap())
            .await
            .unwrap();
        stack
            .ledger
            .compare_and_put(
                &passport.passport_id,
                DataType::LabResults,
                EntryPointer::Indexed(meta_blob),
                None,
            )
            .await
            .unwrap();

        // Appending through the vault must extend the descriptor.
        stack
            .vault
            .save(
                &passport,
                DataType::LabResults,
                &[json!({"test": "ldl"})],
                None,
            )
            .await
            .unwrap();

        let loaded = stack
            .vault
            .load(&passport, DataType::LabResults)
            .await
            .unwrap();
        assert_eq!(
            loaded,
            vec![json!({"test": "hba1c"}), json!({"test": "ldl"})]
        );

        // The pointer is still indexed, one descriptor deep.
        let record = stack
            .ledger
            .get(&passport.passport_id, DataType::LabResults)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(record.pointer, EntryPointer::Indexed(_)));
    }

    #[tokio::test]
    async fn test_backoff_delay_is_bounded() {
        assert_eq!(backoff_delay(250, 1), Duration::from_millis(250));
        assert_eq!(backoff_delay(250, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(250, 3), Duration::from_millis(1000));
        // Shift saturates instead of overflowing
        assert_eq!(backoff_delay(250, 40), Duration::from_millis(250 << 8));
    }
}
