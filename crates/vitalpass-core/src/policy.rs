//! Access policy derivation
//!
//! Every `(owner identity, data type)` pair maps to one deterministic
//! policy identifier. The identifier is the authorization scope the
//! key-holding services check access proofs against: holding rights to
//! an owner's medications policy says nothing about their lab results.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::{DataType, OwnerIdentity};

/// Domain separation tag for policy derivation
const POLICY_DOMAIN_TAG: &[u8] = b"vitalpass.policy.v1";

/// Deterministic access-policy identifier, hex over a 32-byte digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the policy identifier for `(owner, data_type)`.
///
/// Pure and idempotent: the same inputs always produce the same id, and
/// distinct data types for the same owner never collide. The owner
/// identity is length-prefixed so no `(owner, type)` pair can alias
/// another by concatenation.
pub fn derive_policy_id(owner: &OwnerIdentity, data_type: DataType) -> PolicyId {
    let mut hasher = Sha256::new();
    hasher.update(POLICY_DOMAIN_TAG);
    hasher.update((owner.as_str().len() as u32).to_be_bytes());
    hasher.update(owner.as_str().as_bytes());
    hasher.update(data_type.as_str().as_bytes());
    PolicyId(hex::encode(hasher.finalize()))
}

/// String-boundary variant: parses the data-type key first and rejects
/// unrecognized keys with `InvalidDataType`.
pub fn derive_policy_id_str(owner: &OwnerIdentity, data_type_key: &str) -> Result<PolicyId> {
    let data_type = DataType::parse(data_type_key)?;
    Ok(derive_policy_id(owner, data_type))
}

/// A policy identifier together with the ownership fact it was derived
/// from.
///
/// The gateway hands the binding (not just the raw id) to key-holding
/// services at wrap time so they can anchor their later authorization
/// check to the owner identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub owner: OwnerIdentity,
    pub data_type: DataType,
    pub policy_id: PolicyId,
}

impl PolicyBinding {
    pub fn derive(owner: OwnerIdentity, data_type: DataType) -> Self {
        let policy_id = derive_policy_id(&owner, data_type);
        Self {
            owner,
            data_type,
            policy_id,
        }
    }
}
