//! Capability Session Management
//!
//! A capability session is a short-TTL credential binding the owner's
//! wallet key to decryption rights. It is created unsigned, signed once
//! by the owner's wallet, and then mints one access proof per decryption
//! call until it expires. Expired sessions are never revived; callers
//! create a new one.
//!
//! Signing stays external: the session hands the wallet a challenge and
//! stores the returned signature. Nothing here ever sees a private key.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, VaultError};
use crate::policy::PolicyId;
use crate::types::{OwnerIdentity, PassportId};

/// Domain separation tag for session challenges
const CHALLENGE_DOMAIN_TAG: &[u8] = b"vitalpass.session.v1";

/// External signing callback — supplied by the wallet layer.
///
/// `sign` may prompt the user, so it is async and may be slow; the
/// session manager makes sure concurrent callers share one signing
/// round.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Ed25519 verifying key of the signing identity
    fn public_key(&self) -> [u8; 32];

    /// Sign a session challenge
    async fn sign(&self, challenge: &[u8]) -> Result<[u8; 64]>;
}

/// In-process Ed25519 signer for tests and local tooling.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Generate a fresh keypair from the OS RNG
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(bytes),
        }
    }

    /// Owner identity string for this key (hex of the verifying key)
    pub fn owner_identity(&self) -> OwnerIdentity {
        OwnerIdentity::new(hex::encode(self.key.verifying_key().to_bytes()))
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    async fn sign(&self, challenge: &[u8]) -> Result<[u8; 64]> {
        use ed25519_dalek::Signer as _;
        Ok(self.key.sign(challenge).to_bytes())
    }
}

/// Canonical challenge bytes the wallet signs for a session.
///
/// Every field is length-prefixed so no two field combinations can
/// produce the same byte string.
pub fn challenge_bytes(
    session_id: &str,
    owner: &OwnerIdentity,
    public_key: &[u8; 32],
    expires_at: i64,
) -> Vec<u8> {
    let expiry = expires_at.to_be_bytes();
    let fields: [&[u8]; 4] = [
        session_id.as_bytes(),
        owner.as_str().as_bytes(),
        public_key,
        &expiry,
    ];

    let mut out = Vec::with_capacity(64 + CHALLENGE_DOMAIN_TAG.len());
    out.extend_from_slice(CHALLENGE_DOMAIN_TAG);
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// A short-lived capability credential.
///
/// State machine: `Created -> Signed -> (valid until expiry) -> Expired`.
/// There is no transition out of `Expired`. Sessions are never persisted
/// as "still valid"; expiry is re-checked on every use.
#[derive(Debug, Clone)]
pub struct CapabilitySession {
    pub session_id: String,
    pub owner: OwnerIdentity,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    public_key: Option<[u8; 32]>,
    signature: Option<[u8; 64]>,
}

impl CapabilitySession {
    /// Create an unsigned session for an owner with the given TTL
    pub fn create(owner: OwnerIdentity, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            session_id: format!("cap_{}", uuid::Uuid::new_v4()),
            owner,
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs as i64),
            public_key: None,
            signature: None,
        }
    }

    /// Check if the session has passed its expiry
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Remaining session time in seconds
    pub fn remaining_seconds(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Sign the session with the owner's wallet.
    ///
    /// Fails with `SessionExpired` if the session lapsed before the
    /// wallet responded; an expired session cannot become signed.
    pub async fn sign(&mut self, signer: &dyn Signer) -> Result<()> {
        if self.is_expired() {
            return Err(VaultError::SessionExpired {
                expired_at: self.expires_at.timestamp(),
            });
        }

        let public_key = signer.public_key();
        let challenge = challenge_bytes(
            &self.session_id,
            &self.owner,
            &public_key,
            self.expires_at.timestamp(),
        );
        let signature = signer.sign(&challenge).await?;

        self.public_key = Some(public_key);
        self.signature = Some(signature);
        debug!(session_id = %self.session_id, owner = %self.owner, "Session signed");
        Ok(())
    }

    /// Mint a one-shot access proof for a single decryption call.
    ///
    /// The proof is bound to one policy identifier; key-holding services
    /// reject it for any other. Fails with `SessionUnsigned` before
    /// [`CapabilitySession::sign`] and `SessionExpired` after expiry.
    pub fn build_access_proof(
        &self,
        passport_id: &PassportId,
        policy_id: &PolicyId,
    ) -> Result<AccessProof> {
        let signature = self.signature.ok_or(VaultError::SessionUnsigned)?;
        let public_key = self.public_key.ok_or(VaultError::SessionUnsigned)?;
        if self.is_expired() {
            return Err(VaultError::SessionExpired {
                expired_at: self.expires_at.timestamp(),
            });
        }

        Ok(AccessProof {
            proof_id: format!("prf_{}", uuid::Uuid::new_v4()),
            session_id: self.session_id.clone(),
            passport_id: passport_id.clone(),
            policy_id: policy_id.clone(),
            public_key: hex::encode(public_key),
            expires_at: self.expires_at.timestamp(),
            signature: hex::encode(signature),
        })
    }
}

/// One-shot artifact authorizing a single decryption call.
///
/// Carries everything a key-holding service needs to verify the caller:
/// the session signature, the signing key, the expiry, and the policy
/// the proof is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessProof {
    pub proof_id: String,
    pub session_id: String,
    pub passport_id: PassportId,
    pub policy_id: PolicyId,
    /// Hex Ed25519 verifying key of the session signer
    pub public_key: String,
    /// Unix seconds
    pub expires_at: i64,
    /// Hex Ed25519 signature over the session challenge
    pub signature: String,
}

impl AccessProof {
    /// Verify this proof against an expected policy scope and owner.
    ///
    /// Checks, in order: policy binding, expiry, that the signing key IS
    /// the owner identity, and the Ed25519 signature over the session
    /// challenge. This is the check every key-holding service runs
    /// before releasing a decryption share.
    pub fn verify(&self, expected_policy: &PolicyId, owner: &OwnerIdentity) -> Result<()> {
        if &self.policy_id != expected_policy {
            return Err(VaultError::AccessDenied(format!(
                "proof is bound to policy {}, not {}",
                self.policy_id, expected_policy
            )));
        }

        if Utc::now().timestamp() >= self.expires_at {
            return Err(VaultError::AccessDenied(format!(
                "capability session {} expired",
                self.session_id
            )));
        }

        if self.public_key != owner.as_str() {
            return Err(VaultError::AccessDenied(format!(
                "signing key does not match owner identity for session {}",
                self.session_id
            )));
        }

        let key_bytes: [u8; 32] = hex::decode(&self.public_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| VaultError::AccessDenied("malformed proof public key".to_string()))?;
        let sig_bytes: [u8; 64] = hex::decode(&self.signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| VaultError::AccessDenied("malformed proof signature".to_string()))?;

        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| VaultError::AccessDenied("invalid proof public key".to_string()))?;
        let challenge = challenge_bytes(&self.session_id, owner, &key_bytes, self.expires_at);

        verifying_key
            .verify(&challenge, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| VaultError::AccessDenied("proof signature verification failed".to_string()))
    }
}

/// Lazily creates and caches the current capability session.
///
/// Session creation triggers a wallet signing round, so creation is
/// guarded by a single mutex: concurrent callers awaiting a fresh
/// session share one round instead of each prompting the wallet.
pub struct SessionManager {
    owner: OwnerIdentity,
    ttl_secs: u64,
    signer: Arc<dyn Signer>,
    slot: tokio::sync::Mutex<Option<CapabilitySession>>,
}

impl SessionManager {
    pub fn new(owner: OwnerIdentity, signer: Arc<dyn Signer>, ttl_secs: u64) -> Self {
        Self {
            owner,
            ttl_secs,
            signer,
            slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Get the current valid session, creating and signing one if the
    /// slot is empty or expired.
    pub async fn current(&self) -> Result<CapabilitySession> {
        let mut slot = self.slot.lock().await;

        if let Some(ref session) = *slot {
            if !session.is_expired() {
                return Ok(session.clone());
            }
        }

        let session = self.create_signed().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Drop any cached session and sign a fresh one.
    pub async fn refresh(&self) -> Result<CapabilitySession> {
        let mut slot = self.slot.lock().await;
        let session = self.create_signed().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn create_signed(&self) -> Result<CapabilitySession> {
        let mut session = CapabilitySession::create(self.owner.clone(), self.ttl_secs);
        session.sign(self.signer.as_ref()).await?;
        info!(
            session_id = %session.session_id,
            owner = %self.owner,
            ttl_secs = self.ttl_secs,
            "Created capability session"
        );
        Ok(session)
    }
}
