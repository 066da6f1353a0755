//! HTTP client for a remote key-holding service

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::keyholder::{KeyHolder, WrappedShare};
use super::shares::KeyShare;
use crate::error::{Result, VaultError};
use crate::policy::{PolicyBinding, PolicyId};
use crate::session::AccessProof;

/// Configuration for one key-holding service endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyHolderConfig {
    /// Stable service identity recorded in envelopes
    pub holder_id: String,

    /// Base URL of the service, e.g. `https://keys-0.example.com`
    pub base_url: String,

    /// Optional bearer token sent as `Authorization: Bearer ...`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Serialize)]
struct WrapRequest<'a> {
    policy_id: &'a PolicyId,
    owner: &'a str,
    data_type: &'a str,
    index: u8,
    /// Base64 share bytes
    share: String,
}

#[derive(Deserialize)]
struct WrapResponse {
    /// Base64 wrapped share
    wrapped: String,
}

#[derive(Serialize)]
struct UnwrapRequest<'a> {
    policy_id: &'a PolicyId,
    /// Base64 wrapped share
    wrapped: String,
    proof: &'a AccessProof,
}

#[derive(Deserialize)]
struct UnwrapResponse {
    index: u8,
    /// Base64 share bytes
    share: String,
}

/// Remote key-holding service reached over HTTPS.
///
/// Authorization rejections (401/403) map to `AccessDenied`; every
/// transport failure or server error maps to `QuorumUnavailable` so the
/// gateway counts the service as missing from the quorum, not as a
/// policy decision.
pub struct HttpKeyHolder {
    config: KeyHolderConfig,
    client: Client,
}

impl HttpKeyHolder {
    pub fn new(config: KeyHolderConfig) -> Self {
        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .expect("Invalid API key"),
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self { config, client }
    }

    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                VaultError::QuorumUnavailable(format!(
                    "key-holding service {} unreachable: {e}",
                    self.config.holder_id
                ))
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(VaultError::AccessDenied(format!(
                    "key-holding service {} rejected the request: {body}",
                    self.config.holder_id
                )))
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(VaultError::QuorumUnavailable(format!(
                    "key-holding service {} returned {status}: {body}",
                    self.config.holder_id
                )))
            }
            _ => response.json().await.map_err(|e| {
                VaultError::QuorumUnavailable(format!(
                    "key-holding service {} sent a malformed response: {e}",
                    self.config.holder_id
                ))
            }),
        }
    }
}

#[async_trait]
impl KeyHolder for HttpKeyHolder {
    fn holder_id(&self) -> &str {
        &self.config.holder_id
    }

    async fn wrap_share(&self, binding: &PolicyBinding, share: &KeyShare) -> Result<WrappedShare> {
        let response: WrapResponse = self
            .post(
                "/v1/share/wrap",
                &WrapRequest {
                    policy_id: &binding.policy_id,
                    owner: binding.owner.as_str(),
                    data_type: binding.data_type.as_str(),
                    index: share.index,
                    share: BASE64.encode(&share.bytes),
                },
            )
            .await?;

        let bytes = BASE64.decode(&response.wrapped).map_err(|_| {
            VaultError::QuorumUnavailable(format!(
                "key-holding service {} sent invalid base64",
                self.config.holder_id
            ))
        })?;
        Ok(WrappedShare { bytes })
    }

    async fn unwrap_share(
        &self,
        policy_id: &PolicyId,
        wrapped: &WrappedShare,
        proof: &AccessProof,
    ) -> Result<KeyShare> {
        let response: UnwrapResponse = self
            .post(
                "/v1/share/unwrap",
                &UnwrapRequest {
                    policy_id,
                    wrapped: BASE64.encode(&wrapped.bytes),
                    proof,
                },
            )
            .await?;

        let bytes = BASE64.decode(&response.share).map_err(|_| {
            VaultError::QuorumUnavailable(format!(
                "key-holding service {} sent invalid base64",
                self.config.holder_id
            ))
        })?;
        Ok(KeyShare {
            index: response.index,
            bytes,
        })
    }
}
