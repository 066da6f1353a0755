//! HTTP client for the blob store API

use crate::error::{Result, StorageError};
use crate::types::{PutBlobReceipt, StorageConfig};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;

/// HTTP client for the content-addressed blob store.
///
/// Exposes exactly the contract the store guarantees: `put` bytes and
/// receive an opaque id, `get` bytes for a known id, `exists` for a
/// cheap presence probe. Retries are the caller's responsibility.
pub struct StorageClient {
    config: StorageConfig,
    client: Client,
}

impl StorageClient {
    /// Create a new storage client
    pub fn new(config: StorageConfig) -> Self {
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

    /// Store a blob, returning the server-minted content id
    pub async fn put_blob(&self, data: &[u8], mime_type: &str) -> Result<PutBlobReceipt> {
        let url = format!("{}/blob/", self.config.base_url);

        let response = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, mime_type)
            .body(data.to_vec())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a blob by content id
    pub async fn get_blob(&self, blob_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/blob/{}",
            self.config.base_url,
            urlencoding::encode(blob_id)
        );

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(blob_id.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Server {
                status,
                message: body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Check if a blob exists
    pub async fn blob_exists(&self, blob_id: &str) -> Result<bool> {
        let url = format!(
            "{}/blob/{}",
            self.config.base_url,
            urlencoding::encode(blob_id)
        );

        let response = self.client.head(&url).send().await?;
        Ok(response.status().is_success())
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound("Resource not found".to_string()));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Server {
                status,
                message: body,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}
