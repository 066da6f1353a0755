//! In-process key-holding service
//!
//! Stands in for a remote service in tests and local development. It
//! runs the same checks a production service would: policy binding,
//! session expiry, proof signature against the owner identity, and
//! one-shot proof use.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::keyholder::{KeyHolder, WrappedShare};
use super::shares::KeyShare;
use super::NONCE_LEN;
use crate::error::{Result, VaultError};
use crate::policy::{PolicyBinding, PolicyId};
use crate::session::AccessProof;
use crate::types::OwnerIdentity;

/// Domain separation tag for per-policy wrap keys
const WRAP_DOMAIN_TAG: &[u8] = b"vitalpass.holder.wrap.v1";

/// What a wrap seals alongside the share: the ownership fact the
/// service later authorizes against.
#[derive(Serialize, Deserialize)]
struct WrapPayload {
    owner: String,
    index: u8,
    /// Base64 share bytes
    share: String,
}

/// Simulated key-holding service with its own master secret.
pub struct SimulatedKeyHolder {
    holder_id: String,
    master: [u8; 32],
    offline: AtomicBool,
    seen_proofs: DashMap<String, ()>,
}

impl SimulatedKeyHolder {
    pub fn new(holder_id: impl Into<String>, master: [u8; 32]) -> Self {
        Self {
            holder_id: holder_id.into(),
            master,
            offline: AtomicBool::new(false),
            seen_proofs: DashMap::new(),
        }
    }

    /// Create a holder with a random master secret
    pub fn generate(holder_id: impl Into<String>) -> Self {
        let mut master = [0u8; 32];
        OsRng.fill_bytes(&mut master);
        Self::new(holder_id, master)
    }

    /// Toggle a simulated outage; while offline every call fails as
    /// unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(VaultError::QuorumUnavailable(format!(
                "key-holding service {} is unreachable",
                self.holder_id
            )));
        }
        Ok(())
    }

    // Per-policy wrap key: this service's master secret bound to the
    // policy identifier.
    fn wrap_key(&self, policy_id: &PolicyId) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(WRAP_DOMAIN_TAG);
        hasher.update(self.master);
        hasher.update(policy_id.as_str().as_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl KeyHolder for SimulatedKeyHolder {
    fn holder_id(&self) -> &str {
        &self.holder_id
    }

    async fn wrap_share(&self, binding: &PolicyBinding, share: &KeyShare) -> Result<WrappedShare> {
        self.check_online()?;

        let payload = serde_json::to_vec(&WrapPayload {
            owner: binding.owner.to_string(),
            index: share.index,
            share: BASE64.encode(&share.bytes),
        })?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.wrap_key(&binding.policy_id)));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_slice())
            .map_err(|e| VaultError::Internal(format!("share wrap failed: {e}")))?;

        let mut bytes = Vec::with_capacity(NONCE_LEN + sealed.len());
        bytes.extend_from_slice(&nonce);
        bytes.extend_from_slice(&sealed);
        Ok(WrappedShare { bytes })
    }

    async fn unwrap_share(
        &self,
        policy_id: &PolicyId,
        wrapped: &WrappedShare,
        proof: &AccessProof,
    ) -> Result<KeyShare> {
        self.check_online()?;

        if wrapped.bytes.len() <= NONCE_LEN {
            return Err(VaultError::InvalidCiphertext(format!(
                "wrapped share from {} is truncated",
                self.holder_id
            )));
        }
        let (nonce, sealed) = wrapped.bytes.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.wrap_key(policy_id)));
        let payload = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| {
                VaultError::InvalidCiphertext(format!(
                    "wrapped share from {} failed authentication",
                    self.holder_id
                ))
            })?;
        let payload: WrapPayload = serde_json::from_slice(&payload).map_err(|e| {
            VaultError::InvalidCiphertext(format!(
                "wrap payload from {} is corrupt: {e}",
                self.holder_id
            ))
        })?;

        // The authorization check a real service would run.
        proof.verify(policy_id, &OwnerIdentity::new(payload.owner))?;

        if self
            .seen_proofs
            .insert(proof.proof_id.clone(), ())
            .is_some()
        {
            return Err(VaultError::AccessDenied(format!(
                "access proof {} already used",
                proof.proof_id
            )));
        }

        debug!(
            holder_id = %self.holder_id,
            policy_id = %policy_id,
            proof_id = %proof.proof_id,
            "Released decryption share"
        );

        let bytes = BASE64.decode(&payload.share).map_err(|_| {
            VaultError::InvalidCiphertext(format!(
                "share payload from {} is not valid base64",
                self.holder_id
            ))
        })?;
        Ok(KeyShare {
            index: payload.index,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CapabilitySession, Ed25519Signer};
    use crate::types::{DataType, PassportId};

    async fn proof_for(
        signer: &Ed25519Signer,
        binding: &PolicyBinding,
    ) -> AccessProof {
        let mut session = CapabilitySession::create(signer.owner_identity(), 3600);
        session.sign(signer).await.unwrap();
        session
            .build_access_proof(&PassportId::new("pp-1"), &binding.policy_id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_wrap_unwrap_roundtrip() {
        let holder = SimulatedKeyHolder::generate("holder-0");
        let signer = Ed25519Signer::generate();
        let binding = PolicyBinding::derive(signer.owner_identity(), DataType::Medications);
        let share = KeyShare {
            index: 1,
            bytes: vec![9u8; 32],
        };

        let wrapped = holder.wrap_share(&binding, &share).await.unwrap();
        let proof = proof_for(&signer, &binding).await;
        let released = holder
            .unwrap_share(&binding.policy_id, &wrapped, &proof)
            .await
            .unwrap();

        assert_eq!(released.index, 1);
        assert_eq!(released.bytes, share.bytes);
    }

    #[tokio::test]
    async fn test_proof_is_one_shot_per_holder() {
        let holder = SimulatedKeyHolder::generate("holder-0");
        let signer = Ed25519Signer::generate();
        let binding = PolicyBinding::derive(signer.owner_identity(), DataType::Medications);
        let share = KeyShare {
            index: 1,
            bytes: vec![1u8; 32],
        };

        let wrapped = holder.wrap_share(&binding, &share).await.unwrap();
        let proof = proof_for(&signer, &binding).await;

        holder
            .unwrap_share(&binding.policy_id, &wrapped, &proof)
            .await
            .unwrap();
        match holder.unwrap_share(&binding.policy_id, &wrapped, &proof).await {
            Err(VaultError::AccessDenied(_)) => {}
            other => panic!("expected AccessDenied on replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_holder_is_unreachable() {
        let holder = SimulatedKeyHolder::generate("holder-0");
        let signer = Ed25519Signer::generate();
        let binding = PolicyBinding::derive(signer.owner_identity(), DataType::Medications);
        let share = KeyShare {
            index: 1,
            bytes: vec![1u8; 32],
        };

        holder.set_offline(true);
        match holder.wrap_share(&binding, &share).await {
            Err(VaultError::QuorumUnavailable(_)) => {}
            other => panic!("expected QuorumUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cross_policy_unwrap_fails() {
        let holder = SimulatedKeyHolder::generate("holder-0");
        let signer = Ed25519Signer::generate();
        let meds = PolicyBinding::derive(signer.owner_identity(), DataType::Medications);
        let labs = PolicyBinding::derive(signer.owner_identity(), DataType::LabResults);
        let share = KeyShare {
            index: 1,
            bytes: vec![1u8; 32],
        };

        let wrapped = holder.wrap_share(&meds, &share).await.unwrap();
        let proof = proof_for(&signer, &labs).await;

        // Wrong wrap key: the share was bound to the medications policy.
        assert!(holder
            .unwrap_share(&labs.policy_id, &wrapped, &proof)
            .await
            .is_err());
    }
}
