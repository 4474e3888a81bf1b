//! In-memory implementation of the BlobStore trait.
//!
//! This is primarily for testing. Nothing survives a drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use keygate_core::ContentAddress;

use crate::error::{Result, StorageError};
use crate::traits::BlobStore;

/// In-memory blob store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentAddress, Bytes>>,
    offline: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreUnavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overwrite stored bytes without checking the address.
    pub fn corrupt(&self, address: &ContentAddress, bytes: impl Into<Bytes>) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(*address, bytes.into());
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::StoreUnavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_blob(&self, address: &ContentAddress, bytes: Bytes) -> Result<()> {
        self.check_online()?;
        let mut blobs = self
            .blobs
            .write()
            .map_err(|e| StorageError::StoreUnavailable(format!("lock poisoned: {e}")))?;
        blobs.entry(*address).or_insert(bytes);
        Ok(())
    }

    async fn get_blob(&self, address: &ContentAddress) -> Result<Option<Bytes>> {
        self.check_online()?;
        let blobs = self
            .blobs
            .read()
            .map_err(|e| StorageError::StoreUnavailable(format!("lock poisoned: {e}")))?;
        Ok(blobs.get(address).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryBlobStore::new();
        let address = ContentAddress::for_bytes(b"blob");

        store.put_blob(&address, Bytes::from_static(b"blob")).await.unwrap();
        store.put_blob(&address, Bytes::from_static(b"blob")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get_blob(&address).await.unwrap().unwrap(), "blob");
        assert!(store
            .get_blob(&ContentAddress::for_bytes(b"other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_offline() {
        let store = MemoryBlobStore::new();
        store.set_offline(true);

        let result = store.get_blob(&ContentAddress::for_bytes(b"x")).await;
        assert!(matches!(result, Err(StorageError::StoreUnavailable(_))));
    }
}
