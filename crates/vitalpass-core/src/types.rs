//! Core identity and catalog types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Opaque owner identity.
///
/// The pipeline never interprets this string; the simulated stack uses
/// the hex encoding of an Ed25519 verifying key so key-holding services
/// can check access-proof signatures against it without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerIdentity(String);

impl OwnerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque passport handle minted by the owner registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassportId(String);

impl PassportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PassportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque content id minted by the blob store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single per-owner record anchoring all encrypted health-data
/// references. Exactly one live passport per owner identity; the owner
/// registry enforces that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passport {
    pub passport_id: PassportId,

    /// Identity of the owner wallet that controls this passport
    pub owner: OwnerIdentity,

    /// Identity string fed into policy derivation. Defaults to the owner
    /// identity at mint time; kept separate so a future key rotation can
    /// migrate policies without re-minting the passport.
    pub policy_seed: String,

    /// ISO 3166-1 alpha-2 country of issuance
    pub country_code: String,

    /// Owner-mutable consent flag for anonymized analytics
    pub analytics_opt_in: bool,

    pub created_at: DateTime<Utc>,
}

impl Passport {
    /// The identity all access policies for this passport derive from.
    pub fn policy_identity(&self) -> OwnerIdentity {
        OwnerIdentity::new(self.policy_seed.clone())
    }
}

/// Recognized health-record categories.
///
/// Each data type carries its own independent access policy; access to
/// one never implies access to another. Unrecognized keys are rejected
/// at the boundary by [`DataType::parse`], never silently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Demographics snapshot: name, birth date, blood type
    BasicProfile,
    /// Cumulative medication log
    Medications,
    /// Cumulative lab result log
    LabResults,
    /// Current condition/diagnosis snapshot
    Conditions,
    /// Self-reported vitals and metrics
    SelfMetrics,
    /// Imaging study metadata (the images themselves are blobs)
    ImagingMeta,
}

impl DataType {
    /// Every recognized data type, in vocabulary order
    pub const ALL: [DataType; 6] = [
        DataType::BasicProfile,
        DataType::Medications,
        DataType::LabResults,
        DataType::Conditions,
        DataType::SelfMetrics,
        DataType::ImagingMeta,
    ];

    /// Stable wire key for this data type
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::BasicProfile => "basic_profile",
            DataType::Medications => "medications",
            DataType::LabResults => "lab_results",
            DataType::Conditions => "conditions",
            DataType::SelfMetrics => "self_metrics",
            DataType::ImagingMeta => "imaging_meta",
        }
    }

    /// Parse a wire key, rejecting anything outside the vocabulary.
    pub fn parse(key: &str) -> Result<Self> {
        match key {
            "basic_profile" => Ok(DataType::BasicProfile),
            "medications" => Ok(DataType::Medications),
            "lab_results" => Ok(DataType::LabResults),
            "conditions" => Ok(DataType::Conditions),
            "self_metrics" => Ok(DataType::SelfMetrics),
            "imaging_meta" => Ok(DataType::ImagingMeta),
            _ => Err(VaultError::InvalidDataType {
                key: key.to_string(),
            }),
        }
    }

    /// Default write mode when the caller does not pick one.
    ///
    /// Snapshot types replace their latest state; cumulative logs append.
    pub fn default_write_mode(&self) -> WriteMode {
        match self {
            DataType::BasicProfile | DataType::Conditions => WriteMode::Replace,
            DataType::Medications
            | DataType::LabResults
            | DataType::SelfMetrics
            | DataType::ImagingMeta => WriteMode::Append,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a catalog write treats existing references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Push a new version, keeping history
    Append,
    /// Swap the pointer to reference only the new payload
    Replace,
}

/// Where the current encrypted material for one `(passport, data_type)`
/// lives.
///
/// `Flat` is the direct form: an ordered list of data-blob references.
/// `Indexed` points at an encrypted Metadata Descriptor that in turn
/// lists the data blobs. Readers pattern-match; they never assume one
/// shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", content = "refs", rename_all = "snake_case")]
pub enum EntryPointer {
    Flat(Vec<BlobRef>),
    Indexed(BlobRef),
}

impl EntryPointer {
    /// All blob references this pointer names, in insertion order.
    pub fn references(&self) -> Vec<&BlobRef> {
        match self {
            EntryPointer::Flat(refs) => refs.iter().collect(),
            EntryPointer::Indexed(meta) => vec![meta],
        }
    }
}

/// One catalog record with its optimistic-concurrency stamp.
///
/// The version increments on every successful write; writers present the
/// version they read and fail with `VersionConflict` if it went stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub pointer: EntryPointer,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}
