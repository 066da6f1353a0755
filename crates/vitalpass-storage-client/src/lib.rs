//! Client for the VitalPass content-addressed blob store API
//!
//! The blob store is deliberately dumb: it accepts bytes and mints an
//! opaque content id, and it returns bytes for a known id. All structure
//! and all encryption live in the caller (`vitalpass-core`); nothing this
//! client uploads is plaintext health data.
//!
//! # Example
//!
//! ```rust,no_run
//! use vitalpass_storage_client::{StorageClient, StorageConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StorageClient::new(StorageConfig {
//!     base_url: "http://localhost:8080".into(),
//!     ..Default::default()
//! });
//!
//! let receipt = client.put_blob(b"ciphertext bytes", "application/octet-stream").await?;
//! let bytes = client.get_blob(&receipt.blob_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod types;

pub use client::StorageClient;
pub use error::{Result, StorageError};
pub use types::{PutBlobReceipt, StorageConfig};
