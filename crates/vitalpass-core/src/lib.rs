//! VitalPass core - encrypted health passport pipeline
//!
//! Stores personal health records off-device in encrypted form while a
//! minimal on-chain catalog tracks, per record type, where the current
//! encrypted material lives and who may decrypt it.
//!
//! # Architecture
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Access Policy Binding | [`policy`] | deterministic `(owner, data type)` → policy id |
//! | Threshold Encryption Gateway | [`gateway`] | T-of-N envelope encryption against key-holding services |
//! | Capability Session | [`session`] | short-TTL signed credential minting one-shot access proofs |
//! | Entry Catalog | [`catalog`] | per-type pointer/history over the on-chain ledger |
//! | Entry Orchestrator | [`orchestrator`] | `save` / `load` / `load_all` / `has` pipeline |
//!
//! The external collaborators — blob store, owner registry, key-holding
//! services, ledger — are trait seams with in-memory implementations for
//! tests and local development; HTTP clients cover the real deployments.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vitalpass_core::{
//!     DataType, Ed25519Signer, MemoryBlobStore, MemoryLedger, MemoryRegistry,
//!     RecordVault, SimulatedKeyHolder, VaultConfig,
//! };
//!
//! let signer = Ed25519Signer::generate();
//! let vault = RecordVault::new(
//!     signer.owner_identity(),
//!     Arc::new(signer),
//!     Arc::new(MemoryLedger::new()),
//!     holders,
//!     Arc::new(MemoryBlobStore::new()),
//!     Arc::new(MemoryRegistry::new()),
//!     VaultConfig::default(),
//! );
//!
//! let passport = vault.mint_passport("JP", true).await?;
//! vault.save(&passport, DataType::Medications, &records, None).await?;
//! let records = vault.load(&passport, DataType::Medications).await?;
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metadata;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;

// Re-export the surface most callers need
pub use catalog::{CatalogLedger, EntryCatalog, MemoryLedger};
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use gateway::http::{HttpKeyHolder, KeyHolderConfig};
pub use gateway::simulated::SimulatedKeyHolder;
pub use gateway::{default_threshold, KeyHolder, ThresholdGateway};
pub use metadata::{DescriptorEntry, MetadataDescriptor};
pub use orchestrator::{BatchLoad, RecordVault, SaveReceipt, TypedFailure, TypedRecords};
pub use policy::{derive_policy_id, derive_policy_id_str, PolicyBinding, PolicyId};
pub use registry::{MemoryRegistry, OwnerRegistry};
pub use session::{AccessProof, CapabilitySession, Ed25519Signer, SessionManager, Signer};
pub use store::{BlobStore, MemoryBlobStore};
pub use types::{
    BlobRef, CatalogRecord, DataType, EntryPointer, OwnerIdentity, Passport, PassportId, WriteMode,
};

// Re-export the blob store client crate
pub use vitalpass_storage_client;
