//! Key-holding service contract
//!
//! Each key-holding service independently wraps one share of a data key
//! at encryption time and releases it again only against a valid access
//! proof. Services are configuration, never hard-coded; the gateway
//! treats them uniformly through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::shares::KeyShare;
use crate::error::Result;
use crate::policy::{PolicyBinding, PolicyId};
use crate::session::AccessProof;

/// A key share wrapped by one service; opaque to everyone else
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedShare {
    pub bytes: Vec<u8>,
}

/// One independent key-holding service.
///
/// Error contract: authorization rejections surface as `AccessDenied`,
/// structural problems with the wrapped share as `InvalidCiphertext`,
/// and outages/transport failures as `QuorumUnavailable` so the gateway
/// can tell a denied quorum from a missing one.
#[async_trait]
pub trait KeyHolder: Send + Sync {
    /// Stable identity of this service, recorded in envelopes
    fn holder_id(&self) -> &str;

    /// Wrap a share under the policy binding.
    ///
    /// The binding carries the owner identity so the service can anchor
    /// its later authorization check to it.
    async fn wrap_share(&self, binding: &PolicyBinding, share: &KeyShare) -> Result<WrappedShare>;

    /// Verify the proof and release the decryption share.
    async fn unwrap_share(
        &self,
        policy_id: &PolicyId,
        wrapped: &WrappedShare,
        proof: &AccessProof,
    ) -> Result<KeyShare>;
}
