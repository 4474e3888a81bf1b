//! SQLite implementation of the BlobStore trait.
//!
//! A local pinning cache. Uses rusqlite with bundled SQLite, wrapped in async
//! via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use keygate_core::{now_millis, ContentAddress};

use crate::error::{Result, StorageError};
use crate::migration;
use crate::traits::BlobStore;

/// SQLite-based blob store. Thread-safe via internal Mutex.
#[derive(Clone)]
pub struct SqliteBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlobStore {
    /// Open a SQLite database at the given path, creating and migrating it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StorageError::StoreUnavailable(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::StoreUnavailable(format!("spawn_blocking failed: {e}")))?
    }

    /// Number of cached blobs.
    pub async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?)
        })
        .await
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn put_blob(&self, address: &ContentAddress, bytes: Bytes) -> Result<()> {
        let digest = address.digest().to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blobs (address, bytes, stored_at) VALUES (?1, ?2, ?3)",
                params![digest, bytes.as_ref(), now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_blob(&self, address: &ContentAddress) -> Result<Option<Bytes>> {
        let digest = address.digest().to_vec();
        self.with_conn(move |conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT bytes FROM blobs WHERE address = ?1",
                    params![digest],
                    |row| row.get(0),
                )
                .optional()?;
            if bytes.is_some() {
                conn.execute(
                    "UPDATE blobs SET last_read_at = ?1 WHERE address = ?2",
                    params![now_millis(), digest],
                )?;
            }
            Ok(bytes.map(Bytes::from))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteBlobStore::open_memory().unwrap();
        let address = ContentAddress::for_bytes(b"payload");

        store.put_blob(&address, Bytes::from_static(b"payload")).await.unwrap();
        store.put_blob(&address, Bytes::from_static(b"payload")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get_blob(&address).await.unwrap().unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = SqliteBlobStore::open_memory().unwrap();
        let missing = store.get_blob(&ContentAddress::for_bytes(b"nope")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.db");
        let address = ContentAddress::for_bytes(b"persisted");

        {
            let store = SqliteBlobStore::open(&path).unwrap();
            store.put_blob(&address, Bytes::from_static(b"persisted")).await.unwrap();
        }

        let reopened = SqliteBlobStore::open(&path).unwrap();
        assert_eq!(reopened.get_blob(&address).await.unwrap().unwrap(), "persisted");
    }
}
