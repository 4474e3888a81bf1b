//! BlobStore trait: content-addressed byte storage.
//!
//! Envelope storage is backend-agnostic. Implementations include an HTTP
//! pinning gateway (primary), SQLite (local cache) and in-memory (tests).

use async_trait::async_trait;
use bytes::Bytes;

use keygate_core::ContentAddress;

use crate::error::Result;

/// Async interface for content-addressed blobs.
///
/// Writes are idempotent: putting the same bytes under the same address
/// twice is not an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `address`. Callers compute the address.
    async fn put_blob(&self, address: &ContentAddress, bytes: Bytes) -> Result<()>;

    /// Fetch the bytes stored under `address`.
    async fn get_blob(&self, address: &ContentAddress) -> Result<Option<Bytes>>;

    /// Public URL for `address`, if this backend serves one.
    fn gateway_url(&self, _address: &ContentAddress) -> Option<String> {
        None
    }
}
