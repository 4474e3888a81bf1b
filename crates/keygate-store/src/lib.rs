//! # Keygate Store
//!
//! Content-addressed storage for encrypted envelopes.
//!
//! ## Overview
//!
//! An [`Envelope`] bundles a ciphertext with its binding hash and access
//! policy. [`EnvelopeStore`] serializes it to JSON, addresses it by CIDv1
//! and hands the bytes to a [`BlobStore`]. On fetch the bytes are checked
//! against the requested address before being parsed.
//!
//! ## Key Types
//!
//! - [`BlobStore`] - The async trait for byte storage
//! - [`GatewayBlobStore`] - HTTP(S) pinning gateway
//! - [`SqliteBlobStore`] - Local SQLite cache
//! - [`MemoryBlobStore`] - In-memory storage for tests

pub mod envelope;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use envelope::{Envelope, EnvelopeStore};
pub use error::{Result, StorageError};
pub use gateway::{GatewayBlobStore, GatewayConfig};
pub use memory::MemoryBlobStore;
pub use sqlite::SqliteBlobStore;
pub use traits::BlobStore;
