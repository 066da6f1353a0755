//! Owner registry boundary
//!
//! The registry maps each owner identity to exactly one passport. That
//! invariant is the registry's to enforce; this crate trusts it and only
//! consumes `lookup` and `create`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

use crate::error::Result;
use crate::types::{OwnerIdentity, Passport, PassportId};

#[async_trait]
pub trait OwnerRegistry: Send + Sync {
    async fn lookup(&self, owner: &OwnerIdentity) -> Result<Option<PassportId>>;

    /// Mint a passport for an owner, or return the existing one — one
    /// live passport per owner identity, always.
    async fn create(
        &self,
        owner: &OwnerIdentity,
        country_code: &str,
        analytics_opt_in: bool,
    ) -> Result<Passport>;
}

/// In-memory registry for tests and local development.
pub struct MemoryRegistry {
    passports: DashMap<String, Passport>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            passports: DashMap::new(),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OwnerRegistry for MemoryRegistry {
    async fn lookup(&self, owner: &OwnerIdentity) -> Result<Option<PassportId>> {
        Ok(self
            .passports
            .get(owner.as_str())
            .map(|p| p.passport_id.clone()))
    }

    async fn create(
        &self,
        owner: &OwnerIdentity,
        country_code: &str,
        analytics_opt_in: bool,
    ) -> Result<Passport> {
        let passport = self
            .passports
            .entry(owner.as_str().to_string())
            .or_insert_with(|| {
                let passport = Passport {
                    passport_id: PassportId::new(format!("pp_{}", uuid::Uuid::new_v4())),
                    owner: owner.clone(),
                    policy_seed: owner.as_str().to_string(),
                    country_code: country_code.to_string(),
                    analytics_opt_in,
                    created_at: Utc::now(),
                };
                info!(
                    passport_id = %passport.passport_id,
                    owner = %owner,
                    country_code,
                    "Minted passport"
                );
                passport
            })
            .clone();
        Ok(passport)
    }
}
