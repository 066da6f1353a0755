//! Threshold Encryption Gateway
//!
//! Envelope encryption against a quorum of key-holding services:
//!
//! 1. A random 256-bit data key seals the payload (ChaCha20-Poly1305).
//! 2. The data key is split T-of-N; each service wraps one share.
//! 3. Decryption presents an access proof to every service named in the
//!    envelope, concurrently, and recombines the first T shares that
//!    come back.
//!
//! The gateway keeps no state between calls. A lost quorum is
//! `QuorumUnavailable` (transient), a rejected proof is `AccessDenied`
//! (never retried), a malformed envelope is `InvalidCiphertext`.

pub mod http;
pub mod keyholder;
pub mod shares;
pub mod simulated;

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use futures::future::join_all;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, VaultError};
use crate::policy::{PolicyBinding, PolicyId};
use crate::session::AccessProof;

pub use keyholder::{KeyHolder, WrappedShare};
pub use shares::KeyShare;

/// Current envelope schema version
pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;

/// Data key length in bytes (ChaCha20-Poly1305 key)
pub const DATA_KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Default quorum policy: 2-of-N once at least two services exist,
/// otherwise the single available service.
///
/// The cap at 2 bounds unwrap fan-out cost and tolerates one service
/// outage without dropping below a real quorum. It is a tunable policy,
/// not a hard law — callers wanting a deeper quorum pass their own
/// threshold to [`ThresholdGateway::encrypt`].
pub fn default_threshold(service_count: usize) -> u8 {
    if service_count >= 2 {
        2
    } else {
        1
    }
}

/// Owner-held recovery material: the raw data key of one envelope.
///
/// Zeroized on drop; export it immediately or lose it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BackupKeyMaterial {
    key: [u8; DATA_KEY_LEN],
}

impl BackupKeyMaterial {
    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }
}

impl std::fmt::Debug for BackupKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackupKeyMaterial(<redacted>)")
    }
}

/// One wrapped share as recorded in an envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeShare {
    pub holder_id: String,
    pub index: u8,
    /// Base64 of the service-wrapped share
    pub wrapped: String,
}

/// The sealed payload plus the threshold metadata needed to open it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: u32,
    pub policy_id: PolicyId,
    pub threshold: u8,
    /// Base64 of the 12-byte AEAD nonce
    pub nonce: String,
    pub shares: Vec<EnvelopeShare>,
    /// Base64 of the sealed payload
    pub payload: String,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and structurally validate an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::InvalidCiphertext(format!("envelope decode failed: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(VaultError::InvalidCiphertext(
                "threshold metadata is zero".to_string(),
            ));
        }
        if self.shares.len() < self.threshold as usize {
            return Err(VaultError::InvalidCiphertext(format!(
                "envelope lists {} shares but requires {}",
                self.shares.len(),
                self.threshold
            )));
        }
        for (i, share) in self.shares.iter().enumerate() {
            if share.index == 0 {
                return Err(VaultError::InvalidCiphertext(
                    "share index 0 is reserved".to_string(),
                ));
            }
            if self.shares[..i].iter().any(|s| s.index == share.index) {
                return Err(VaultError::InvalidCiphertext(format!(
                    "duplicate share index {}",
                    share.index
                )));
            }
        }
        self.nonce_bytes()?;
        Ok(())
    }

    fn nonce_bytes(&self) -> Result<[u8; NONCE_LEN]> {
        BASE64
            .decode(&self.nonce)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| VaultError::InvalidCiphertext("malformed envelope nonce".to_string()))
    }

    fn payload_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.payload)
            .map_err(|_| VaultError::InvalidCiphertext("malformed envelope payload".to_string()))
    }
}

/// Stateless client-side gateway over the configured key-holding
/// services.
pub struct ThresholdGateway {
    holders: Vec<Arc<dyn KeyHolder>>,
}

impl ThresholdGateway {
    pub fn new(holders: Vec<Arc<dyn KeyHolder>>) -> Self {
        Self { holders }
    }

    /// Number of configured key-holding services
    pub fn service_count(&self) -> usize {
        self.holders.len()
    }

    /// Seal a payload under a policy with a T-of-N quorum.
    ///
    /// Every configured service must wrap its share for the write to
    /// succeed; a write that silently dropped shares would lower the
    /// effective quorum of future reads.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        binding: &PolicyBinding,
        threshold: u8,
    ) -> Result<(Envelope, BackupKeyMaterial)> {
        let service_count = self.holders.len();
        if threshold == 0 || threshold as usize > service_count {
            return Err(VaultError::InvalidThreshold {
                threshold,
                service_count,
            });
        }

        let mut data_key = [0u8; DATA_KEY_LEN];
        OsRng.fill_bytes(&mut data_key);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&data_key));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| VaultError::Internal(format!("payload encryption failed: {e}")))?;

        let key_shares = shares::split(&data_key, service_count as u8, threshold)?;

        let wraps = self.holders.iter().zip(key_shares.iter()).map(|(holder, share)| {
            async move {
                let wrapped = holder.wrap_share(binding, share).await?;
                Ok::<_, VaultError>(EnvelopeShare {
                    holder_id: holder.holder_id().to_string(),
                    index: share.index,
                    wrapped: BASE64.encode(&wrapped.bytes),
                })
            }
        });

        let mut envelope_shares = Vec::with_capacity(service_count);
        for wrap in join_all(wraps).await {
            envelope_shares.push(wrap?);
        }

        debug!(
            policy_id = %binding.policy_id,
            threshold,
            services = service_count,
            "Sealed payload under threshold policy"
        );

        let envelope = Envelope {
            schema_version: ENVELOPE_SCHEMA_VERSION,
            policy_id: binding.policy_id.clone(),
            threshold,
            nonce: BASE64.encode(nonce),
            shares: envelope_shares,
            payload: BASE64.encode(&sealed),
        };

        Ok((envelope, BackupKeyMaterial { key: data_key }))
    }

    /// Open an envelope with an access proof.
    pub async fn decrypt(&self, ciphertext: &[u8], proof: &AccessProof) -> Result<Vec<u8>> {
        let envelope = Envelope::from_bytes(ciphertext)?;

        if proof.policy_id != envelope.policy_id {
            return Err(VaultError::AccessDenied(format!(
                "proof is bound to policy {}, ciphertext to {}",
                proof.policy_id, envelope.policy_id
            )));
        }

        let nonce = envelope.nonce_bytes()?;
        let payload = envelope.payload_bytes()?;
        let threshold = envelope.threshold as usize;

        let by_id: HashMap<&str, &Arc<dyn KeyHolder>> = self
            .holders
            .iter()
            .map(|h| (h.holder_id(), h))
            .collect();

        let requests = envelope.shares.iter().map(|entry| {
            let holder = by_id.get(entry.holder_id.as_str()).copied();
            let policy_id = &envelope.policy_id;
            async move {
                let holder = holder.ok_or_else(|| {
                    VaultError::QuorumUnavailable(format!(
                        "no configured key-holding service {}",
                        entry.holder_id
                    ))
                })?;
                let wrapped_bytes = BASE64.decode(&entry.wrapped).map_err(|_| {
                    VaultError::InvalidCiphertext(format!(
                        "wrapped share from {} is not valid base64",
                        entry.holder_id
                    ))
                })?;
                holder
                    .unwrap_share(policy_id, &WrappedShare { bytes: wrapped_bytes }, proof)
                    .await
            }
        });

        let mut recovered: Vec<KeyShare> = Vec::new();
        let mut denied: Option<VaultError> = None;
        let mut structural: Option<VaultError> = None;
        let mut unavailable = 0usize;

        for outcome in join_all(requests).await {
            match outcome {
                Ok(share) => {
                    if recovered.len() < threshold {
                        recovered.push(share);
                    }
                }
                Err(e @ VaultError::AccessDenied(_)) => denied = Some(e),
                Err(e @ VaultError::InvalidCiphertext(_)) => structural = Some(e),
                Err(_) => unavailable += 1,
            }
        }

        if recovered.len() < threshold {
            if let Some(denied) = denied {
                return Err(denied);
            }
            if let Some(structural) = structural {
                return Err(structural);
            }
            return Err(VaultError::QuorumUnavailable(format!(
                "{} of {} decryption shares available ({} services unreachable)",
                recovered.len(),
                threshold,
                unavailable
            )));
        }

        let data_key = Zeroizing::new(shares::combine(&recovered[..threshold], DATA_KEY_LEN)?);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&data_key));
        cipher
            .decrypt(Nonce::from_slice(&nonce), payload.as_slice())
            .map_err(|_| {
                VaultError::InvalidCiphertext("payload authentication failed".to_string())
            })
    }
}
